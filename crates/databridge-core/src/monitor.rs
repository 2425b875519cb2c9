//! Monitoring & Alerting (C11) — aggregates connector health and raises
//! threshold-based alerts (spec §4.9). Connectors register/unregister
//! explicitly rather than the monitor holding weak handles into the
//! registry, per the design note that explicit lifecycle calls are easier
//! to reason about than a background sweep racing connector teardown.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::connector::{Connector, ConnectorMetadata, PoolMetrics};

/// Severity of a [`PerformanceAlert`] (spec §3 `AlertLevel`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
    Error,
}

/// A single raised alert (spec §3 `PerformanceAlert`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceAlert {
    pub connector_id: String,
    pub level: AlertLevel,
    pub message: String,
    pub raised_at: chrono::DateTime<chrono::Utc>,
}

/// A point-in-time health rollup for one connector (spec §3
/// `ConnectionHealth`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionHealth {
    pub connector_id: String,
    pub healthy: bool,
    pub last_error: Option<String>,
    pub pool: PoolMetrics,
}

/// Thresholds driving alert generation; all defaults mirror the ambient
/// env knobs in [`crate::config::DataBridgeConfig`].
#[derive(Debug, Clone, Copy)]
pub struct MonitorThresholds {
    pub max_failed_op_ratio: f64,
    pub max_avg_op_duration_micros: u64,
    pub min_idle_connections: usize,
}

impl Default for MonitorThresholds {
    fn default() -> Self {
        Self {
            max_failed_op_ratio: 0.1,
            max_avg_op_duration_micros: 500_000,
            min_idle_connections: 0,
        }
    }
}

/// Aggregates health/metrics across every registered connector and raises
/// [`PerformanceAlert`]s against [`MonitorThresholds`] (spec §4.9).
pub struct Monitor {
    connectors: RwLock<HashMap<String, Arc<dyn Connector>>>,
    thresholds: MonitorThresholds,
    alerts: RwLock<Vec<PerformanceAlert>>,
}

impl Monitor {
    #[must_use]
    pub fn new(thresholds: MonitorThresholds) -> Self {
        Self {
            connectors: RwLock::new(HashMap::new()),
            thresholds,
            alerts: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, connector: Arc<dyn Connector>) {
        self.connectors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(connector.id().to_owned(), connector);
    }

    pub fn unregister(&self, connector_id: &str) {
        self.connectors.write().unwrap_or_else(|e| e.into_inner()).remove(connector_id);
    }

    /// Run a health check against every registered connector, collect
    /// [`ConnectionHealth`] rollups, and raise any new alerts.
    pub async fn sweep(&self) -> Vec<ConnectionHealth> {
        let snapshot: Vec<Arc<dyn Connector>> =
            self.connectors.read().unwrap_or_else(|e| e.into_inner()).values().cloned().collect();

        let mut healths = Vec::with_capacity(snapshot.len());
        for connector in snapshot {
            let metadata: ConnectorMetadata = connector.health_check().await;
            let pool = connector.performance_metrics();
            self.evaluate(connector.id(), &metadata, &pool);
            healths.push(ConnectionHealth {
                connector_id: connector.id().to_owned(),
                healthy: metadata.healthy,
                last_error: metadata.last_error,
                pool,
            });
        }
        healths
    }

    fn evaluate(&self, connector_id: &str, metadata: &ConnectorMetadata, pool: &PoolMetrics) {
        let mut new_alerts = Vec::new();

        if !metadata.healthy {
            new_alerts.push(PerformanceAlert {
                connector_id: connector_id.to_owned(),
                level: AlertLevel::Critical,
                message: metadata
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "connector reported unhealthy".to_owned()),
                raised_at: chrono::Utc::now(),
            });
        }

        if pool.total_ops > 0 {
            let failure_ratio = pool.failed_ops as f64 / pool.total_ops as f64;
            if failure_ratio > self.thresholds.max_failed_op_ratio {
                new_alerts.push(PerformanceAlert {
                    connector_id: connector_id.to_owned(),
                    level: AlertLevel::Warning,
                    message: format!(
                        "failed-op ratio {failure_ratio:.2} exceeds threshold {:.2}",
                        self.thresholds.max_failed_op_ratio
                    ),
                    raised_at: chrono::Utc::now(),
                });
            }
        }

        if pool.avg_op_duration_micros > self.thresholds.max_avg_op_duration_micros {
            new_alerts.push(PerformanceAlert {
                connector_id: connector_id.to_owned(),
                level: AlertLevel::Warning,
                message: format!(
                    "average op duration {}us exceeds threshold {}us",
                    pool.avg_op_duration_micros, self.thresholds.max_avg_op_duration_micros
                ),
                raised_at: chrono::Utc::now(),
            });
        }

        if !new_alerts.is_empty() {
            self.alerts.write().unwrap_or_else(|e| e.into_inner()).extend(new_alerts);
        }
    }

    /// Drain and return every alert raised since the last call.
    pub fn drain_alerts(&self) -> Vec<PerformanceAlert> {
        std::mem::take(&mut self.alerts.write().unwrap_or_else(|e| e.into_inner()))
    }

    #[must_use]
    pub fn registered_ids(&self) -> Vec<String> {
        self.connectors.read().unwrap_or_else(|e| e.into_inner()).keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluate_raises_critical_alert_on_unhealthy_connector() {
        let monitor = Monitor::new(MonitorThresholds::default());
        let metadata = ConnectorMetadata {
            healthy: false,
            last_error: Some("boom".to_owned()),
            ..ConnectorMetadata::default()
        };
        let pool = PoolMetrics {
            total_ops: 0,
            failed_ops: 0,
            avg_op_duration_micros: 0,
            active_connections: 0,
            idle_connections: 0,
            max_connections: 5,
            min_connections: 1,
            created_at: std::time::Duration::default(),
        };
        monitor.evaluate("c1", &metadata, &pool);
        let alerts = monitor.drain_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Critical);
    }

    #[test]
    fn evaluate_raises_warning_on_high_failure_ratio() {
        let monitor = Monitor::new(MonitorThresholds::default());
        let metadata = ConnectorMetadata {
            healthy: true,
            ..ConnectorMetadata::default()
        };
        let pool = PoolMetrics {
            total_ops: 100,
            failed_ops: 50,
            avg_op_duration_micros: 0,
            active_connections: 1,
            idle_connections: 1,
            max_connections: 5,
            min_connections: 1,
            created_at: std::time::Duration::default(),
        };
        monitor.evaluate("c1", &metadata, &pool);
        let alerts = monitor.drain_alerts();
        assert!(alerts.iter().any(|a| a.level == AlertLevel::Warning));
    }

    #[test]
    fn drain_alerts_empties_the_queue() {
        let monitor = Monitor::new(MonitorThresholds::default());
        let metadata = ConnectorMetadata {
            healthy: false,
            ..ConnectorMetadata::default()
        };
        let pool = PoolMetrics {
            total_ops: 0,
            failed_ops: 0,
            avg_op_duration_micros: 0,
            active_connections: 0,
            idle_connections: 0,
            max_connections: 1,
            min_connections: 1,
            created_at: std::time::Duration::default(),
        };
        monitor.evaluate("c1", &metadata, &pool);
        assert_eq!(monitor.drain_alerts().len(), 1);
        assert_eq!(monitor.drain_alerts().len(), 0);
    }
}
