//! Cached provider health probes.
//!
//! Probing a provider costs a network round trip, so reports are cached
//! per provider id for `health.cache_ttl`.

use futures::future::join_all;
use moka::future::Cache;

use crate::config::HealthConfig;
use crate::providers::{HealthReport, ProviderCapability, ProviderRegistry};

pub struct HealthMonitor {
    cache: Cache<String, HealthReport>,
}

impl HealthMonitor {
    pub fn new(config: &HealthConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.cache_ttl)
            .build();

        Self { cache }
    }

    /// Cached report for one capability, probing on a miss.
    pub async fn probe(&self, id: &str, capability: &dyn ProviderCapability) -> HealthReport {
        if let Some(report) = self.cache.get(id).await {
            tracing::trace!(provider = %id, "Health report served from cache");
            return report;
        }

        let report = capability.health_probe().await;
        if report.is_failing() {
            tracing::warn!(
                provider = %id,
                status = ?report.status,
                error = report.error.as_deref().unwrap_or(""),
                "Provider unhealthy"
            );
        }
        self.cache.insert(id.to_string(), report.clone()).await;
        report
    }

    /// Probe every registered provider concurrently.
    ///
    /// Reports come back in registration order.
    pub async fn probe_all(&self, registry: &ProviderRegistry) -> Vec<HealthReport> {
        join_all(
            registry
                .iter()
                .map(|(id, capability)| self.probe(id, capability.as_ref())),
        )
        .await
    }

    /// Drop the cached report for one provider.
    pub async fn invalidate(&self, id: &str) {
        self.cache.invalidate(id).await;
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(&HealthConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::HealthStatus;
    use crate::testing::ScriptedProvider;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_reports_in_registration_order() {
        let slow = Arc::new(ScriptedProvider::ok("slow", "x").with_delay(Duration::from_millis(30)));
        let down = Arc::new(ScriptedProvider::failing("down", "connection refused"));
        let fast = Arc::new(ScriptedProvider::ok("fast", "x"));
        let registry = ProviderRegistry::new()
            .with(slow)
            .with(down)
            .with(fast);

        let reports = HealthMonitor::default().probe_all(&registry).await;
        let ids: Vec<&str> = reports.iter().map(|r| r.provider.as_str()).collect();
        assert_eq!(ids, vec!["slow", "down", "fast"]);
        assert_eq!(reports[1].status, HealthStatus::Degraded);
        assert!(reports[1]
            .error
            .as_deref()
            .unwrap()
            .contains("connection refused"));
    }

    #[tokio::test]
    async fn test_reports_are_cached_until_invalidated() {
        let provider = Arc::new(ScriptedProvider::ok("a", "x"));
        let registry = ProviderRegistry::new().with(provider.clone());
        let monitor = HealthMonitor::default();

        monitor.probe_all(&registry).await;
        monitor.probe_all(&registry).await;
        assert_eq!(provider.probes(), 1);

        monitor.invalidate("a").await;
        monitor.probe_all(&registry).await;
        assert_eq!(provider.probes(), 2);
    }

    #[tokio::test]
    async fn test_probe_single_capability() {
        let config = HealthConfig {
            cache_ttl: Duration::from_secs(1),
            max_entries: 1,
        };
        let monitor = HealthMonitor::new(&config);
        let provider = ScriptedProvider::ok("a", "x");
        assert!(monitor.probe("a", &provider).await.is_healthy());
    }
}
