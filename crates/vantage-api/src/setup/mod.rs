//! Application setup and initialization

pub mod database;
pub mod routes;
pub mod server;
pub mod services;

use crate::state::AppState;
use anyhow::{Context, Result};
use std::sync::Arc;
use vantage_core::Config;

/// Validate config, start tracing, connect the database, build the services
/// and the router.
pub async fn initialize_app(config: Config) -> Result<(Arc<AppState>, axum::Router)> {
    config.validate().context("Configuration validation failed")?;

    crate::telemetry::init_telemetry(config.base.log_format)
        .context("Failed to initialize telemetry")?;

    tracing::info!(
        environment = %config.base.environment,
        pipeline = %config.pipeline.pipeline_name,
        "Configuration loaded and validated"
    );

    let pool = database::setup_database(&config).await?;

    let state = services::initialize_services(&config, pool).await?;

    let router = routes::setup_routes(&config, state.clone())?;

    Ok((state, router))
}
