use std::sync::Arc;
use std::time::Duration;

use vantage_cache::CacheStore;
use vantage_core::constants::cache_keys::SYSTEM_ALERTS;
use vantage_core::models::Alert;

/// Alerts kept in the ring, newest first.
pub const ALERT_RING_CAPACITY: usize = 50;
pub const ALERT_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Records operator alerts in the log and the `system_alerts` ring.
#[derive(Clone)]
pub struct AlertService {
    cache: Arc<CacheStore>,
}

impl AlertService {
    pub fn new(cache: Arc<CacheStore>) -> Self {
        Self { cache }
    }

    /// Returns whether the alert reached the ring. It is logged either way.
    pub async fn raise(&self, alert: &Alert) -> bool {
        tracing::warn!(
            severity = %alert.severity,
            subject = %alert.subject,
            message = %alert.message,
            "ALERT"
        );
        self.cache
            .push_capped(SYSTEM_ALERTS, alert, ALERT_RING_CAPACITY, ALERT_TTL)
            .await
    }

    pub async fn recent(&self, limit: usize) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self.cache.list_json(SYSTEM_ALERTS).await;
        alerts.truncate(limit);
        alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vantage_cache::MemoryBackend;
    use vantage_core::models::AlertSeverity;

    #[tokio::test]
    async fn test_ring_keeps_most_recent_fifty() {
        let cache = Arc::new(CacheStore::new(Arc::new(MemoryBackend::new()), 1024));
        let alerts = AlertService::new(cache);
        for i in 0..60 {
            assert!(
                alerts
                    .raise(&Alert::new(format!("alert {}", i), "details", AlertSeverity::Low))
                    .await
            );
        }
        let recent = alerts.recent(100).await;
        assert_eq!(recent.len(), ALERT_RING_CAPACITY);
        assert_eq!(recent[0].subject, "alert 59");
        assert_eq!(recent[49].subject, "alert 10");
        assert_eq!(alerts.recent(5).await.len(), 5);
    }
}
