//! Route configuration and setup

use crate::constants::API_PREFIX;
use crate::handlers;
use crate::state::AppState;
use axum::{
    http::{HeaderValue, Method},
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use vantage_core::Config;

pub fn setup_routes(config: &Config, state: Arc<AppState>) -> Result<Router<()>, anyhow::Error> {
    let cors = setup_cors(config);

    let app = Router::new()
        .nest(API_PREFIX, api_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    Ok(app)
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::health::metrics))
        .route("/filtered-data", get(handlers::filtered::get_filtered_data))
        .route("/admin/refresh-data", post(handlers::admin::trigger_refresh))
        .route("/admin/warm-cache", post(handlers::admin::trigger_warm_cache))
        .route("/admin/cache", delete(handlers::admin::clear_cache))
        .route("/admin/reports/daily", get(handlers::admin::get_daily_report))
        .route("/admin/alerts", get(handlers::admin::list_alerts))
        .route("/admin/refresh-jobs", get(handlers::admin::list_refresh_jobs))
}

fn setup_cors(config: &Config) -> CorsLayer {
    let origins = &config.base.cors_origins;
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        tracing::warn!("CORS configured to allow all origins");
        cors.allow_origin(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        cors.allow_origin(parsed)
    }
}
