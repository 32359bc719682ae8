//! Service initialization and application state setup

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;

use vantage_cache::{connect_backend, CacheStore};
use vantage_core::Config;
use vantage_db::{
    DatasetRepository, LoadChunking, RefreshJobRepository, TaskRepository, TaskRepositoryTrait,
};
use vantage_pipeline::{PipelineServices, PipelineStores};
use vantage_source::MetabaseSource;
use vantage_worker::{MaintenanceScheduler, TaskHandlerContext, TaskQueue, TaskQueueConfig};

use crate::follow_ups::QueueFollowUps;
use crate::state::AppState;
use crate::task_dispatch::TaskContext;

/// Build stores and services, start the lane workers and the scheduler.
pub async fn initialize_services(config: &Config, pool: PgPool) -> Result<Arc<AppState>> {
    let backend = connect_backend(config.base.redis_url.as_deref()).await;
    let cache = Arc::new(CacheStore::new(backend, config.pipeline.compression_threshold));
    tracing::info!(
        backend = cache.backend_name(),
        compression_threshold = config.pipeline.compression_threshold,
        "Cache store initialized"
    );

    let source = MetabaseSource::from_config(&config.source)
        .context("Failed to initialize data source client")?;

    let task_repository: Arc<dyn TaskRepositoryTrait> = Arc::new(TaskRepository::new(pool.clone()));
    let stores = PipelineStores {
        dataset: Arc::new(DatasetRepository::new(
            pool.clone(),
            LoadChunking {
                orders: config.pipeline.load_orders_chunk_size,
                vendors: config.pipeline.load_vendors_chunk_size,
            },
        )),
        jobs: Arc::new(RefreshJobRepository::new(pool.clone())),
        tasks: task_repository.clone(),
        cache,
        source: Arc::new(source),
    };

    let queue_config = TaskQueueConfig::from(&config.queue);

    // Refresh follow-ups only submit; the worker queue below needs the
    // services first.
    let submit_queue = TaskQueue::new_no_worker(task_repository.clone(), queue_config.clone());
    let services = PipelineServices::build(
        config,
        stores,
        Arc::new(QueueFollowUps::new(submit_queue)),
    );

    let task_context = Arc::new(TaskContext::new(
        services.clone(),
        config.scheduler.timezone,
    ));
    let context: Arc<dyn TaskHandlerContext> = task_context.clone();
    let task_queue = TaskQueue::new(
        task_repository,
        queue_config,
        Arc::downgrade(&context),
        Some(pool),
    );
    tracing::info!(
        workers_per_lane = config.queue.workers_per_lane,
        poll_interval_ms = config.queue.poll_interval_ms,
        "Task queue started"
    );

    let scheduler_shutdown = if config.scheduler.enabled {
        let scheduler = MaintenanceScheduler::from_config(task_queue.clone(), &config.scheduler);
        let handle = scheduler.shutdown_handle();
        scheduler.spawn();
        Some(handle)
    } else {
        tracing::info!("Maintenance scheduler disabled");
        None
    };

    Ok(Arc::new(AppState {
        config: config.clone(),
        services,
        task_queue,
        task_context,
        scheduler_shutdown,
    }))
}
