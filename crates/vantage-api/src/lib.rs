//! Vantage API Library
//!
//! HTTP surface over the pipeline services, the task dispatcher the lane
//! workers call into, and application setup.

pub mod constants;
pub mod error;
pub mod follow_ups;
mod handlers;
pub mod setup;
pub mod state;
pub mod task_dispatch;
mod telemetry;

pub use error::{ErrorResponse, HttpAppError};
pub use follow_ups::QueueFollowUps;
pub use task_dispatch::TaskContext;
pub use vantage_worker::{TaskQueue, TaskQueueConfig};
