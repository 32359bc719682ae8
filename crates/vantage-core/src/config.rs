//! Configuration module
//!
//! Environment-driven settings for the API process, the refresh pipeline, the
//! task queue and the maintenance scheduler. `.env` files are honoured through
//! `dotenvy`.

use std::env;
use std::fmt;
use std::str::FromStr;

use chrono::Weekday;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_BUSINESS_LINES, DEFAULT_CITIES};
use crate::models::order::ORDER_COLUMN_COUNT;
use crate::models::vendor::VENDOR_COLUMN_COUNT;

const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
/// Postgres caps a single statement at 65535 bind parameters.
const MAX_BIND_PARAMS: usize = 65_535;

/// How the organic flag is filled in for orders that arrive without one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum OrganicBackfill {
    /// Each missing flag is true with probability `ratio`.
    Random { ratio: f64 },
    /// Every missing flag gets the same value.
    Constant { value: bool },
}

impl Default for OrganicBackfill {
    fn default() -> Self {
        OrganicBackfill::Random { ratio: 0.3 }
    }
}

impl FromStr for OrganicBackfill {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "true" => Ok(OrganicBackfill::Constant { value: true }),
            "false" => Ok(OrganicBackfill::Constant { value: false }),
            "random" => Ok(OrganicBackfill::default()),
            other => {
                let ratio = other
                    .strip_prefix("random:")
                    .ok_or_else(|| anyhow::anyhow!("Invalid ORGANIC_BACKFILL value: {}", s))?
                    .parse::<f64>()
                    .map_err(|_| anyhow::anyhow!("Invalid ORGANIC_BACKFILL ratio: {}", s))?;
                Ok(OrganicBackfill::Random { ratio })
            }
        }
    }
}

impl fmt::Display for OrganicBackfill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrganicBackfill::Random { ratio } => write!(f, "random:{}", ratio),
            OrganicBackfill::Constant { value } => write!(f, "{}", value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(anyhow::anyhow!("Invalid LOG_FORMAT: {}", other)),
        }
    }
}

/// Process-level settings.
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub environment: String,
    pub server_port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    /// When unset the in-process cache backend is used.
    pub redis_url: Option<String>,
    pub log_format: LogFormat,
    pub cors_origins: Vec<String>,
}

/// Connection settings for the external analytics source.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    pub orders_question_id: u32,
    pub vendors_question_id: u32,
    pub orders_page_size: usize,
    pub vendors_page_size: usize,
    pub workers: usize,
    pub timeout_seconds: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3000".to_string(),
            username: String::new(),
            password: String::new(),
            orders_question_id: 5822,
            vendors_question_id: 5045,
            orders_page_size: 75_000,
            vendors_page_size: 50_000,
            workers: 8,
            timeout_seconds: 300,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub pipeline_name: String,
    pub compression_threshold: usize,
    pub filtered_cache_ttl_hours: u64,
    pub dataset_cache_ttl_hours: u64,
    pub prewarm_batch_size: usize,
    pub load_orders_chunk_size: usize,
    pub load_vendors_chunk_size: usize,
    pub organic_backfill: OrganicBackfill,
    pub cities: Vec<String>,
    pub business_lines: Vec<String>,
    pub refresh_lease_seconds: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pipeline_name: "main".to_string(),
            compression_threshold: 1024,
            filtered_cache_ttl_hours: 1,
            dataset_cache_ttl_hours: 25,
            prewarm_batch_size: 5,
            load_orders_chunk_size: 5000,
            load_vendors_chunk_size: 4000,
            organic_backfill: OrganicBackfill::default(),
            cities: DEFAULT_CITIES.iter().map(|c| c.to_string()).collect(),
            business_lines: DEFAULT_BUSINESS_LINES
                .iter()
                .map(|b| b.to_string())
                .collect(),
            refresh_lease_seconds: 7200,
        }
    }
}

#[derive(Clone, Debug)]
pub struct QueueConfig {
    pub workers_per_lane: usize,
    pub poll_interval_ms: u64,
    pub refresh_max_retries: i32,
    pub refresh_retry_delay_seconds: i32,
    pub soft_time_limit_seconds: i32,
    pub hard_time_limit_seconds: i32,
    /// Interval in seconds between runs of the stale task reaper. 0 = disabled.
    pub stale_task_reap_interval_secs: u64,
    /// Grace period added to the hard limit before a running task counts as stale.
    pub stale_task_grace_period_secs: i64,
    /// Retention in days for finished tasks. 0 = disabled.
    pub task_retention_days: i32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers_per_lane: 2,
            poll_interval_ms: 1000,
            refresh_max_retries: 3,
            refresh_retry_delay_seconds: 300,
            soft_time_limit_seconds: 3600,
            hard_time_limit_seconds: 7200,
            stale_task_reap_interval_secs: 60,
            stale_task_grace_period_secs: 300,
            task_retention_days: 30,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub timezone: Tz,
    pub daily_refresh_hour: u32,
    pub health_check_interval_minutes: u32,
    pub cleanup_weekday: Weekday,
    pub cleanup_hour: u32,
    pub refresh_job_retention_days: i64,
    pub report_history_limit: usize,
    pub staleness_threshold_hours: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timezone: chrono_tz::Asia::Tehran,
            daily_refresh_hour: 9,
            health_check_interval_minutes: 15,
            cleanup_weekday: Weekday::Mon,
            cleanup_hour: 2,
            refresh_job_retention_days: 30,
            report_history_limit: 30,
            staleness_threshold_hours: 25,
        }
    }
}

/// Full application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub base: BaseConfig,
    pub source: SourceConfig,
    pub pipeline: PipelineConfig,
    pub queue: QueueConfig,
    pub scheduler: SchedulerConfig,
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn parse_bool_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    lookup(key)
        .map(|v| v.trim().to_lowercase())
        .and_then(|v| match v.as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn parse_list(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Vec<String>) -> Vec<String> {
    match lookup(key) {
        Some(raw) => {
            let items: Vec<String> = raw
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
            if items.is_empty() {
                default
            } else {
                items
            }
        }
        None => default,
    }
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup. `from_env` passes
    /// the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, anyhow::Error> {
        let environment = lookup("ENVIRONMENT")
            .or_else(|| lookup("APP_ENV"))
            .unwrap_or_else(|| "development".to_string());

        let base = BaseConfig {
            environment,
            server_port: lookup("PORT")
                .unwrap_or_else(|| "8000".to_string())
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?,
            database_url: lookup("DATABASE_URL")
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set"))?,
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", MAX_CONNECTIONS),
            db_timeout_seconds: parse_or(&lookup, "DB_TIMEOUT_SECONDS", CONNECTION_TIMEOUT_SECS),
            redis_url: lookup("REDIS_URL").filter(|s| !s.trim().is_empty()),
            log_format: lookup("LOG_FORMAT")
                .map(|s| s.parse::<LogFormat>())
                .transpose()?
                .unwrap_or(LogFormat::Text),
            cors_origins: lookup("CORS_ORIGINS")
                .unwrap_or_else(|| "*".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
        };

        let source_defaults = SourceConfig::default();
        let source = SourceConfig {
            url: lookup("SOURCE_URL").unwrap_or(source_defaults.url),
            username: lookup("SOURCE_USERNAME").unwrap_or_default(),
            password: lookup("SOURCE_PASSWORD").unwrap_or_default(),
            orders_question_id: parse_or(
                &lookup,
                "SOURCE_ORDERS_QUESTION_ID",
                source_defaults.orders_question_id,
            ),
            vendors_question_id: parse_or(
                &lookup,
                "SOURCE_VENDORS_QUESTION_ID",
                source_defaults.vendors_question_id,
            ),
            orders_page_size: parse_or(
                &lookup,
                "SOURCE_ORDERS_PAGE_SIZE",
                source_defaults.orders_page_size,
            ),
            vendors_page_size: parse_or(
                &lookup,
                "SOURCE_VENDORS_PAGE_SIZE",
                source_defaults.vendors_page_size,
            ),
            workers: parse_or(&lookup, "SOURCE_WORKERS", source_defaults.workers),
            timeout_seconds: parse_or(
                &lookup,
                "SOURCE_TIMEOUT_SECONDS",
                source_defaults.timeout_seconds,
            ),
        };

        let pipeline_defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            pipeline_name: lookup("PIPELINE_NAME").unwrap_or(pipeline_defaults.pipeline_name),
            compression_threshold: parse_or(
                &lookup,
                "CACHE_COMPRESSION_THRESHOLD",
                pipeline_defaults.compression_threshold,
            ),
            filtered_cache_ttl_hours: parse_or(
                &lookup,
                "FILTERED_CACHE_TTL_HOURS",
                pipeline_defaults.filtered_cache_ttl_hours,
            ),
            dataset_cache_ttl_hours: parse_or(
                &lookup,
                "DATASET_CACHE_TTL_HOURS",
                pipeline_defaults.dataset_cache_ttl_hours,
            ),
            prewarm_batch_size: parse_or(
                &lookup,
                "PREWARM_BATCH_SIZE",
                pipeline_defaults.prewarm_batch_size,
            ),
            load_orders_chunk_size: parse_or(
                &lookup,
                "LOAD_ORDERS_CHUNK_SIZE",
                pipeline_defaults.load_orders_chunk_size,
            ),
            load_vendors_chunk_size: parse_or(
                &lookup,
                "LOAD_VENDORS_CHUNK_SIZE",
                pipeline_defaults.load_vendors_chunk_size,
            ),
            organic_backfill: lookup("ORGANIC_BACKFILL")
                .map(|s| s.parse::<OrganicBackfill>())
                .transpose()?
                .unwrap_or_default(),
            cities: parse_list(&lookup, "CITIES", pipeline_defaults.cities),
            business_lines: parse_list(
                &lookup,
                "BUSINESS_LINES",
                pipeline_defaults.business_lines,
            ),
            refresh_lease_seconds: parse_or(
                &lookup,
                "REFRESH_LEASE_SECONDS",
                pipeline_defaults.refresh_lease_seconds,
            ),
        };

        let queue_defaults = QueueConfig::default();
        let queue = QueueConfig {
            workers_per_lane: parse_or(
                &lookup,
                "TASK_QUEUE_WORKERS_PER_LANE",
                queue_defaults.workers_per_lane,
            ),
            poll_interval_ms: parse_or(
                &lookup,
                "TASK_QUEUE_POLL_INTERVAL_MS",
                queue_defaults.poll_interval_ms,
            ),
            refresh_max_retries: parse_or(
                &lookup,
                "REFRESH_MAX_RETRIES",
                queue_defaults.refresh_max_retries,
            ),
            refresh_retry_delay_seconds: parse_or(
                &lookup,
                "REFRESH_RETRY_DELAY_SECONDS",
                queue_defaults.refresh_retry_delay_seconds,
            ),
            soft_time_limit_seconds: parse_or(
                &lookup,
                "TASK_SOFT_TIME_LIMIT_SECONDS",
                queue_defaults.soft_time_limit_seconds,
            ),
            hard_time_limit_seconds: parse_or(
                &lookup,
                "TASK_HARD_TIME_LIMIT_SECONDS",
                queue_defaults.hard_time_limit_seconds,
            ),
            stale_task_reap_interval_secs: parse_or(
                &lookup,
                "TASK_QUEUE_STALE_TASK_REAP_INTERVAL_SECS",
                queue_defaults.stale_task_reap_interval_secs,
            ),
            stale_task_grace_period_secs: parse_or(
                &lookup,
                "TASK_QUEUE_STALE_TASK_GRACE_PERIOD_SECS",
                queue_defaults.stale_task_grace_period_secs,
            ),
            task_retention_days: parse_or(
                &lookup,
                "TASK_RETENTION_DAYS",
                queue_defaults.task_retention_days,
            ),
        };

        let scheduler_defaults = SchedulerConfig::default();
        let timezone = match lookup("SCHEDULER_TIMEZONE") {
            Some(tz) => tz
                .trim()
                .parse::<Tz>()
                .map_err(|e| anyhow::anyhow!("Unknown SCHEDULER_TIMEZONE '{}': {}", tz, e))?,
            None => scheduler_defaults.timezone,
        };
        let cleanup_weekday = match lookup("CLEANUP_WEEKDAY") {
            Some(day) => day
                .trim()
                .parse::<Weekday>()
                .map_err(|_| anyhow::anyhow!("Invalid CLEANUP_WEEKDAY: {}", day))?,
            None => scheduler_defaults.cleanup_weekday,
        };
        let scheduler = SchedulerConfig {
            enabled: parse_bool_or(&lookup, "SCHEDULER_ENABLED", scheduler_defaults.enabled),
            timezone,
            daily_refresh_hour: parse_or(
                &lookup,
                "DAILY_REFRESH_HOUR",
                scheduler_defaults.daily_refresh_hour,
            ),
            health_check_interval_minutes: parse_or(
                &lookup,
                "HEALTH_CHECK_INTERVAL_MINUTES",
                scheduler_defaults.health_check_interval_minutes,
            ),
            cleanup_weekday,
            cleanup_hour: parse_or(&lookup, "CLEANUP_HOUR", scheduler_defaults.cleanup_hour),
            refresh_job_retention_days: parse_or(
                &lookup,
                "REFRESH_JOB_RETENTION_DAYS",
                scheduler_defaults.refresh_job_retention_days,
            ),
            report_history_limit: parse_or(
                &lookup,
                "REPORT_HISTORY_LIMIT",
                scheduler_defaults.report_history_limit,
            ),
            staleness_threshold_hours: parse_or(
                &lookup,
                "STALENESS_THRESHOLD_HOURS",
                scheduler_defaults.staleness_threshold_hours,
            ),
        };

        let config = Config {
            base,
            source,
            pipeline,
            queue,
            scheduler,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        let env = self.base.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.base.database_url.starts_with("postgres://")
            && !self.base.database_url.starts_with("postgresql://")
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }

        if self.is_production() && self.base.cors_origins.iter().any(|o| o == "*") {
            return Err(anyhow::anyhow!(
                "CORS_ORIGINS cannot be '*' in production. Please specify explicit origins."
            ));
        }

        let pipeline = &self.pipeline;
        if pipeline.compression_threshold == 0 {
            return Err(anyhow::anyhow!(
                "CACHE_COMPRESSION_THRESHOLD must be greater than 0"
            ));
        }
        if let OrganicBackfill::Random { ratio } = pipeline.organic_backfill {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(anyhow::anyhow!(
                    "ORGANIC_BACKFILL ratio must be within [0, 1], got {}",
                    ratio
                ));
            }
        }
        if pipeline.filtered_cache_ttl_hours == 0 || pipeline.dataset_cache_ttl_hours == 0 {
            return Err(anyhow::anyhow!("Cache TTLs must be at least one hour"));
        }
        if pipeline.prewarm_batch_size == 0 {
            return Err(anyhow::anyhow!("PREWARM_BATCH_SIZE must be greater than 0"));
        }
        if pipeline.load_orders_chunk_size == 0
            || pipeline.load_orders_chunk_size * ORDER_COLUMN_COUNT > MAX_BIND_PARAMS
        {
            return Err(anyhow::anyhow!(
                "LOAD_ORDERS_CHUNK_SIZE must be between 1 and {}",
                MAX_BIND_PARAMS / ORDER_COLUMN_COUNT
            ));
        }
        if pipeline.load_vendors_chunk_size == 0
            || pipeline.load_vendors_chunk_size * VENDOR_COLUMN_COUNT > MAX_BIND_PARAMS
        {
            return Err(anyhow::anyhow!(
                "LOAD_VENDORS_CHUNK_SIZE must be between 1 and {}",
                MAX_BIND_PARAMS / VENDOR_COLUMN_COUNT
            ));
        }
        if pipeline.refresh_lease_seconds <= 0 {
            return Err(anyhow::anyhow!("REFRESH_LEASE_SECONDS must be positive"));
        }

        if self.source.workers == 0 {
            return Err(anyhow::anyhow!("SOURCE_WORKERS must be greater than 0"));
        }
        if self.source.orders_page_size == 0 || self.source.vendors_page_size == 0 {
            return Err(anyhow::anyhow!("Source page sizes must be greater than 0"));
        }

        let queue = &self.queue;
        if queue.workers_per_lane == 0 {
            return Err(anyhow::anyhow!(
                "TASK_QUEUE_WORKERS_PER_LANE must be greater than 0"
            ));
        }
        if queue.soft_time_limit_seconds >= queue.hard_time_limit_seconds {
            return Err(anyhow::anyhow!(
                "TASK_SOFT_TIME_LIMIT_SECONDS ({}) must be lower than TASK_HARD_TIME_LIMIT_SECONDS ({})",
                queue.soft_time_limit_seconds,
                queue.hard_time_limit_seconds
            ));
        }
        if queue.refresh_max_retries < 0 || queue.refresh_retry_delay_seconds < 0 {
            return Err(anyhow::anyhow!("Refresh retry settings cannot be negative"));
        }
        // A run abandoned at the time limit must give up its lease before the retry starts.
        let lease = pipeline.refresh_lease_seconds;
        let lease_ceiling =
            i64::from(queue.hard_time_limit_seconds) + i64::from(queue.refresh_retry_delay_seconds);
        if lease < i64::from(queue.soft_time_limit_seconds) || lease > lease_ceiling {
            return Err(anyhow::anyhow!(
                "REFRESH_LEASE_SECONDS ({}) must be between TASK_SOFT_TIME_LIMIT_SECONDS ({}) and TASK_HARD_TIME_LIMIT_SECONDS plus REFRESH_RETRY_DELAY_SECONDS ({})",
                lease,
                queue.soft_time_limit_seconds,
                lease_ceiling
            ));
        }

        let scheduler = &self.scheduler;
        if scheduler.daily_refresh_hour > 23 || scheduler.cleanup_hour > 23 {
            return Err(anyhow::anyhow!("Scheduler hours must be within 0-23"));
        }
        if scheduler.health_check_interval_minutes == 0 {
            return Err(anyhow::anyhow!(
                "HEALTH_CHECK_INTERVAL_MINUTES must be greater than 0"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const DB: (&str, &str) = ("DATABASE_URL", "postgres://localhost/vantage");

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_lookup(lookup_from(&[DB])).unwrap();
        assert_eq!(config.base.server_port, 8000);
        assert!(config.base.redis_url.is_none());
        assert_eq!(config.pipeline.compression_threshold, 1024);
        assert_eq!(config.pipeline.cities, vec!["tehran", "mashhad", "shiraz"]);
        assert_eq!(config.pipeline.business_lines.len(), 4);
        assert_eq!(
            config.pipeline.organic_backfill,
            OrganicBackfill::Random { ratio: 0.3 }
        );
        assert_eq!(config.queue.refresh_max_retries, 3);
        assert_eq!(config.queue.refresh_retry_delay_seconds, 300);
        assert_eq!(config.scheduler.timezone, chrono_tz::Asia::Tehran);
        assert_eq!(config.scheduler.cleanup_weekday, Weekday::Mon);
        assert_eq!(config.source.orders_question_id, 5822);
        assert_eq!(config.source.workers, 8);
    }

    #[test]
    fn test_missing_database_url_rejected() {
        let err = Config::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn test_non_numeric_port_rejected() {
        let err = Config::from_lookup(lookup_from(&[DB, ("PORT", "eighty")])).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn test_zero_compression_threshold_rejected() {
        let result = Config::from_lookup(lookup_from(&[DB, ("CACHE_COMPRESSION_THRESHOLD", "0")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_ratio_out_of_range_rejected() {
        let result = Config::from_lookup(lookup_from(&[DB, ("ORGANIC_BACKFILL", "random:1.5")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_soft_limit_must_be_below_hard_limit() {
        let result = Config::from_lookup(lookup_from(&[
            DB,
            ("TASK_SOFT_TIME_LIMIT_SECONDS", "7200"),
            ("TASK_HARD_TIME_LIMIT_SECONDS", "3600"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_lease_must_expire_before_refresh_retry() {
        let err = Config::from_lookup(lookup_from(&[
            DB,
            ("TASK_SOFT_TIME_LIMIT_SECONDS", "1500"),
            ("TASK_HARD_TIME_LIMIT_SECONDS", "1800"),
            ("REFRESH_LEASE_SECONDS", "7200"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("REFRESH_LEASE_SECONDS"));

        let config = Config::from_lookup(lookup_from(&[
            DB,
            ("TASK_SOFT_TIME_LIMIT_SECONDS", "1500"),
            ("TASK_HARD_TIME_LIMIT_SECONDS", "1800"),
            ("REFRESH_LEASE_SECONDS", "2100"),
        ]))
        .unwrap();
        assert_eq!(config.pipeline.refresh_lease_seconds, 2100);
    }

    #[test]
    fn test_unknown_timezone_rejected() {
        let err = Config::from_lookup(lookup_from(&[DB, ("SCHEDULER_TIMEZONE", "Mars/Olympus")]))
            .unwrap_err();
        assert!(err.to_string().contains("SCHEDULER_TIMEZONE"));
    }

    #[test]
    fn test_chunk_size_respects_bind_limit() {
        let result = Config::from_lookup(lookup_from(&[DB, ("LOAD_VENDORS_CHUNK_SIZE", "10000")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_lists_are_normalized() {
        let config = Config::from_lookup(lookup_from(&[
            DB,
            ("CITIES", " Tehran , shiraz,,"),
            ("BUSINESS_LINES", ""),
        ]))
        .unwrap();
        assert_eq!(config.pipeline.cities, vec!["tehran", "shiraz"]);
        assert_eq!(config.pipeline.business_lines.len(), 4);
    }

    #[test]
    fn test_organic_backfill_parsing() {
        assert_eq!(
            "true".parse::<OrganicBackfill>().unwrap(),
            OrganicBackfill::Constant { value: true }
        );
        assert_eq!(
            "random:0.5".parse::<OrganicBackfill>().unwrap(),
            OrganicBackfill::Random { ratio: 0.5 }
        );
        assert!("sometimes".parse::<OrganicBackfill>().is_err());
        assert_eq!(OrganicBackfill::Random { ratio: 0.3 }.to_string(), "random:0.3");
    }
}
