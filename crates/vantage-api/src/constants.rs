//! API constants

/// Every route is mounted under this prefix.
pub const API_PREFIX: &str = "/api/v2";

/// Service version reported by `/health`.
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Alerts returned by `/admin/alerts` when no limit is given.
pub const DEFAULT_ALERT_LIMIT: usize = 20;

/// Jobs returned by `/admin/refresh-jobs` when no limit is given.
pub const DEFAULT_JOB_LIMIT: i64 = 20;

pub const MAX_LIST_LIMIT: i64 = 200;

/// Window the refresh metrics summarize.
pub const METRICS_WINDOW_DAYS: i64 = 7;
