pub mod admin;
pub mod filtered;
pub mod health;
