//! Health reporting
//!
//! A [`HealthReport`] is assembled on demand from a store ping, the
//! dispatcher's liveness and the chat metrics snapshot.

use serde::Serialize;
use std::time::{Duration, Instant};

use crate::chat::{DispatcherHandle, DispatcherStats, MessageStore};
use crate::metrics::{ChatMetrics, MetricsSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Serving, but chat submissions will fail
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn to_http_status(&self) -> u16 {
        match self {
            HealthStatus::Healthy | HealthStatus::Degraded => 200,
            HealthStatus::Unhealthy => 503,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: &'static str,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ComponentHealth {
    pub fn healthy(name: &'static str) -> Self {
        Self {
            name,
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    pub fn degraded(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            status: HealthStatus::Degraded,
            message: Some(message.into()),
        }
    }

    pub fn unhealthy(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub components: Vec<ComponentHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatcher: Option<DispatcherStats>,
    pub metrics: MetricsSnapshot,
}

impl HealthReport {
    /// Worst component status wins
    pub fn from_components(
        components: Vec<ComponentHealth>,
        dispatcher: Option<DispatcherStats>,
        metrics: MetricsSnapshot,
        uptime: Duration,
    ) -> Self {
        let status = if components.iter().any(|c| c.status == HealthStatus::Unhealthy) {
            HealthStatus::Unhealthy
        } else if components.iter().any(|c| c.status == HealthStatus::Degraded) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Self {
            status,
            version: env!("CARGO_PKG_VERSION"),
            uptime_seconds: uptime.as_secs(),
            components,
            dispatcher,
            metrics,
        }
    }
}

/// Builds health reports for one running chat engine
#[derive(Clone)]
pub struct HealthChecker {
    started: Instant,
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthChecker {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub async fn check(
        &self,
        store: &dyn MessageStore,
        dispatcher: &DispatcherHandle,
        metrics: &ChatMetrics,
    ) -> HealthReport {
        let store_health = checks::check_store(store).await;
        let (dispatcher_health, stats) = checks::check_dispatcher(dispatcher).await;

        HealthReport::from_components(
            vec![store_health, dispatcher_health],
            stats,
            metrics.snapshot(),
            self.started.elapsed(),
        )
    }
}

pub mod checks {
    use super::*;

    /// An unreachable store leaves relay and joins working: degraded
    pub async fn check_store(store: &dyn MessageStore) -> ComponentHealth {
        match store.ping().await {
            Ok(()) => ComponentHealth::healthy("store"),
            Err(e) => ComponentHealth::degraded("store", e.to_string()),
        }
    }

    pub async fn check_dispatcher(
        dispatcher: &DispatcherHandle,
    ) -> (ComponentHealth, Option<DispatcherStats>) {
        match dispatcher.stats().await {
            Ok(stats) => (ComponentHealth::healthy("dispatcher"), Some(stats)),
            Err(e) => (ComponentHealth::unhealthy("dispatcher", e.to_string()), None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worst_status_wins() {
        let report = HealthReport::from_components(
            vec![
                ComponentHealth::healthy("dispatcher"),
                ComponentHealth::degraded("store", "store unavailable"),
            ],
            None,
            MetricsSnapshot::default(),
            Duration::from_secs(3),
        );
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.status.to_http_status(), 200);
        assert_eq!(report.uptime_seconds, 3);

        let report = HealthReport::from_components(
            vec![ComponentHealth::unhealthy("dispatcher", "closed")],
            None,
            MetricsSnapshot::default(),
            Duration::ZERO,
        );
        assert_eq!(report.status.to_http_status(), 503);
    }

    #[test]
    fn test_report_serializes_lowercase_status() {
        let report = HealthReport::from_components(
            vec![ComponentHealth::healthy("store")],
            Some(DispatcherStats::default()),
            MetricsSnapshot::default(),
            Duration::ZERO,
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["components"][0]["name"], "store");
        assert!(json["components"][0].get("message").is_none());
        assert_eq!(json["dispatcher"]["admitted_peers"], 0);
    }
}
