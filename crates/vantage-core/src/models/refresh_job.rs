use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "text", rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum RefreshStatus {
    Running,
    Completed,
    Failed,
}

impl RefreshStatus {
    /// Jobs leave `running` exactly once and never change again.
    pub fn can_transition_to(&self, next: RefreshStatus) -> bool {
        matches!(
            (self, next),
            (RefreshStatus::Running, RefreshStatus::Completed)
                | (RefreshStatus::Running, RefreshStatus::Failed)
        )
    }
}

impl Display for RefreshStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            RefreshStatus::Running => write!(f, "running"),
            RefreshStatus::Completed => write!(f, "completed"),
            RefreshStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for RefreshStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RefreshStatus::Running),
            "completed" => Ok(RefreshStatus::Completed),
            "failed" => Ok(RefreshStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid refresh status: {}", s)),
        }
    }
}

/// Row counts written by a successful refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowCounts {
    pub orders: i64,
    pub vendors: i64,
}

/// Lifecycle record of one refresh run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct RefreshJob {
    pub id: Uuid,
    pub pipeline: String,
    pub status: RefreshStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub orders_processed: Option<i64>,
    pub vendors_processed: Option<i64>,
    pub duration_seconds: Option<f64>,
    pub error_message: Option<String>,
}

impl RefreshJob {
    pub fn start(pipeline: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline: pipeline.into(),
            status: RefreshStatus::Running,
            started_at: now,
            completed_at: None,
            orders_processed: None,
            vendors_processed: None,
            duration_seconds: None,
            error_message: None,
        }
    }

    pub fn rows_processed(&self) -> Option<RowCounts> {
        match (self.orders_processed, self.vendors_processed) {
            (Some(orders), Some(vendors)) => Some(RowCounts { orders, vendors }),
            _ => None,
        }
    }

    /// Seconds between start and `at`, with sub-second precision.
    pub fn elapsed_seconds(&self, at: DateTime<Utc>) -> f64 {
        at.signed_duration_since(self.started_at)
            .num_milliseconds()
            .max(0) as f64
            / 1000.0
    }

    pub fn is_running(&self) -> bool {
        self.status == RefreshStatus::Running
    }
}
