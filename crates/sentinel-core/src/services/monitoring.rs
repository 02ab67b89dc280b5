use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::SentinelError;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::models::{SecurityAction, SecurityEvent};
use crate::store::{IdentityStore, SecurityLogStore};

/// Security actions surfaced to operators as alerts.
const ALERT_ACTIONS: [SecurityAction; 3] = [
    SecurityAction::BlockUser,
    SecurityAction::SuspiciousActivity,
    SecurityAction::ForceLogout,
];

/// Reads store-derived figures into the metrics sink and exposes them.
#[derive(Clone)]
pub struct MonitoringService {
    metrics: Arc<Metrics>,
    identities: Arc<dyn IdentityStore>,
    security_log: Arc<dyn SecurityLogStore>,
}

impl MonitoringService {
    pub fn new(
        metrics: Arc<Metrics>,
        identities: Arc<dyn IdentityStore>,
        security_log: Arc<dyn SecurityLogStore>,
    ) -> Self {
        Self {
            metrics,
            identities,
            security_log,
        }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Copy the active/blocked identity counts into the gauges.
    pub async fn refresh_identity_counts(&self) -> Result<MetricsSnapshot, SentinelError> {
        let active = self.identities.count_active().await?;
        let blocked = self.identities.count_blocked().await?;
        self.metrics.set_active_identities(active);
        self.metrics.set_blocked_identities(blocked);
        Ok(self.metrics.snapshot())
    }

    /// Blocks, suspicious-activity reports and forced logouts in
    /// `from..to`, oldest first.
    pub async fn security_alerts(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SecurityEvent>, SentinelError> {
        let mut alerts = Vec::new();
        for action in ALERT_ACTIONS {
            alerts.extend(self.security_log.list_by_action(action, from, to).await?);
        }
        alerts.sort_by_key(|e| e.created_at);
        Ok(alerts)
    }

    pub fn render_prometheus(&self) -> String {
        self.metrics.render_prometheus()
    }
}
