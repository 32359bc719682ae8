//! Data models for the application
//!
//! Dataset rows, the read-path filter, refresh job lifecycle records, queue
//! tasks, alerts and the health/report documents.

pub mod alert;
pub mod cache;
pub mod filter;
pub mod order;
pub mod refresh_job;
pub mod report;
pub mod task;
pub mod vendor;

pub use alert::*;
pub use cache::*;
pub use filter::*;
pub use order::*;
pub use refresh_job::*;
pub use report::*;
pub use task::*;
pub use vendor::*;
