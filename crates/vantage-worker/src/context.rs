//! Task handler context trait
//!
//! The service binary implements this for its application state; workers call
//! `dispatch_task` for every claimed task and record the outcome.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::{Arc, Weak};

use vantage_core::models::Task;

#[async_trait]
pub trait TaskHandlerContext: Send + Sync {
    /// Run the handler for `task.task_type` and return its JSON result.
    ///
    /// Errors wrapping an unrecoverable `TaskError` fail the task without retry.
    async fn dispatch_task(self: Arc<Self>, task: &Task) -> Result<serde_json::Value>;
}

struct NoopContext;

#[async_trait]
impl TaskHandlerContext for NoopContext {
    async fn dispatch_task(self: Arc<Self>, task: &Task) -> Result<serde_json::Value> {
        Err(anyhow!("no handler context available for {}", task.task_type))
    }
}

/// Weak reference to a context that is already gone. Queues built with it
/// only submit; any task they claim fails to dispatch.
pub fn empty_context_weak() -> Weak<dyn TaskHandlerContext> {
    let n: Arc<dyn TaskHandlerContext> = Arc::new(NoopContext);
    Arc::downgrade(&n)
}
