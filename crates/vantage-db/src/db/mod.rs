//! PostgreSQL repositories.
//!
//! Each repository exposes a trait so the pipeline and worker can run
//! against the in-memory implementations in `crate::memory`.

pub mod dataset;
pub mod refresh_job;
pub mod task;

pub use dataset::{DatasetRepository, DatasetRepositoryTrait, LoadChunking};
pub use refresh_job::{RefreshJobRepository, RefreshJobRepositoryTrait, LEASE_EXPIRED_MESSAGE};
pub use task::{TaskRepository, TaskRepositoryTrait, NEW_TASK_CHANNEL};
