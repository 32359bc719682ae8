//! Vantage persistence layer
//!
//! Repositories over PostgreSQL for the order/vendor dataset, the refresh job
//! lifecycle and the task queue, plus in-memory implementations of the same
//! traits for local runs and tests.

pub mod db;
pub mod memory;

pub use db::{
    DatasetRepository, DatasetRepositoryTrait, LoadChunking, RefreshJobRepository,
    RefreshJobRepositoryTrait, TaskRepository, TaskRepositoryTrait, LEASE_EXPIRED_MESSAGE,
    NEW_TASK_CHANNEL,
};
pub use memory::{InMemoryDatasetRepository, InMemoryRefreshJobRepository, InMemoryTaskRepository};
