//! Vantage Core Library
//!
//! Domain models, error types and configuration shared by every Vantage crate.

pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod task_error;

pub use config::{
    BaseConfig, Config, LogFormat, OrganicBackfill, PipelineConfig, QueueConfig,
    SchedulerConfig, SourceConfig,
};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use task_error::{format_diagnostic, TaskError, TaskResultExt};
