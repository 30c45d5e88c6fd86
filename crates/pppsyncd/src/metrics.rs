//! Prometheus metrics for the sync daemon.

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder};
use std::sync::Arc;
use tracing::warn;

/// Metrics published on `/metrics`.
#[derive(Clone)]
pub struct SyncMetrics {
    registry: Registry,
    pub syncs_total: IntCounter,
    pub sync_failures_total: IntCounter,
    pub customers_created_total: IntCounter,
    pub customers_updated_total: IntCounter,
    pub sync_duration_seconds: Histogram,
}

impl SyncMetrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let syncs_total = IntCounter::with_opts(Opts::new(
            "pppsync_syncs_total",
            "Total sync runs completed successfully",
        ))?;
        let sync_failures_total = IntCounter::with_opts(Opts::new(
            "pppsync_sync_failures_total",
            "Total sync runs that failed",
        ))?;
        let customers_created_total = IntCounter::with_opts(Opts::new(
            "pppsync_customers_created_total",
            "Customers created by sync runs",
        ))?;
        let customers_updated_total = IntCounter::with_opts(Opts::new(
            "pppsync_customers_updated_total",
            "Customers updated by sync runs",
        ))?;
        let sync_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("pppsync_sync_duration_seconds", "Duration of one sync run")
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;

        registry.register(Box::new(syncs_total.clone()))?;
        registry.register(Box::new(sync_failures_total.clone()))?;
        registry.register(Box::new(customers_created_total.clone()))?;
        registry.register(Box::new(customers_updated_total.clone()))?;
        registry.register(Box::new(sync_duration_seconds.clone()))?;

        Ok(Arc::new(Self {
            registry,
            syncs_total,
            sync_failures_total,
            customers_created_total,
            customers_updated_total,
            sync_duration_seconds,
        }))
    }

    /// Renders the registry in the Prometheus text exposition format.
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            warn!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_render_in_exposition() {
        let metrics = SyncMetrics::new().unwrap();
        metrics.syncs_total.inc();
        metrics.customers_created_total.inc_by(3);
        metrics.sync_duration_seconds.observe(0.2);

        let body = metrics.gather();
        assert!(body.contains("pppsync_syncs_total 1"));
        assert!(body.contains("pppsync_customers_created_total 3"));
        assert!(body.contains("pppsync_sync_duration_seconds_bucket"));
    }

    #[test]
    fn test_fresh_registry_has_zero_failures() {
        let metrics = SyncMetrics::new().unwrap();
        assert!(metrics.gather().contains("pppsync_sync_failures_total 0"));
    }
}
