//! Application state shared by handlers.

use std::sync::Arc;

use tokio::sync::broadcast;
use vantage_core::Config;
use vantage_pipeline::PipelineServices;
use vantage_worker::TaskQueue;

use crate::task_dispatch::TaskContext;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub services: PipelineServices,
    pub task_queue: TaskQueue,
    /// Owns the context the lane workers hold weakly. Dropping the state
    /// makes claimed tasks fail to dispatch.
    pub task_context: Arc<TaskContext>,
    pub scheduler_shutdown: Option<broadcast::Sender<()>>,
}

impl AppState {
    /// Stop the scheduler timers and the lane workers.
    pub fn shutdown(&self) {
        if let Some(tx) = &self.scheduler_shutdown {
            let _ = tx.send(());
        }
        self.task_queue.shutdown();
    }
}
