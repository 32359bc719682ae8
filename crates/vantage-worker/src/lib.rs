//! Vantage Worker
//!
//! Lane-based task queue over PostgreSQL and the maintenance scheduler that
//! feeds it.

pub mod context;
pub mod queue;
pub mod scheduler;

pub use context::{empty_context_weak, TaskHandlerContext};
pub use queue::{retry_delay_seconds, TaskQueue, TaskQueueConfig, MAX_RETRY_BACKOFF_SECS};
pub use scheduler::{default_jobs, MaintenanceScheduler, Schedule, ScheduledJob};
