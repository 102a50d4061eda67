//! Prometheus metrics export

use prometheus::{
    register_counter_vec_with_registry, register_gauge_vec_with_registry, CounterVec, Encoder,
    GaugeVec, Opts, Registry, TextEncoder,
};
use serde::{Deserialize, Serialize};
use tracing::error;
use zerobyte_core::BackendStatus;

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics are enabled
    pub enabled: bool,
    /// Namespace prefix for metrics
    pub namespace: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "zerobyte".to_string(),
        }
    }
}

/// Server metrics
pub struct Metrics {
    registry: Registry,
    config: MetricsConfig,

    pub mount_operations_total: CounterVec,
    pub dumps_total: CounterVec,
    pub cache_lookups_total: CounterVec,
    pub volumes_by_status: GaugeVec,
}

impl Metrics {
    pub fn new(config: MetricsConfig) -> anyhow::Result<Self> {
        let registry = Registry::new();
        let ns = &config.namespace;

        let mount_operations_total = register_counter_vec_with_registry!(
            Opts::new("mount_operations_total", "Volume lifecycle operations").namespace(ns),
            &["backend", "operation", "status"],
            registry
        )?;

        let dumps_total = register_counter_vec_with_registry!(
            Opts::new("dumps_total", "Snapshot dumps started").namespace(ns),
            &["kind"],
            registry
        )?;

        let cache_lookups_total = register_counter_vec_with_registry!(
            Opts::new("cache_lookups_total", "Cache lookups by result").namespace(ns),
            &["result"], // "hit" or "miss"
            registry
        )?;

        let volumes_by_status = register_gauge_vec_with_registry!(
            Opts::new("volumes_by_status", "Registered volumes per status").namespace(ns),
            &["status"],
            registry
        )?;

        Ok(Self {
            registry,
            config,
            mount_operations_total,
            dumps_total,
            cache_lookups_total,
            volumes_by_status,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Record a mount, unmount or health check outcome
    pub fn record_mount_operation(&self, backend: &str, operation: &str, status: BackendStatus) {
        if !self.is_enabled() {
            return;
        }
        self.mount_operations_total
            .with_label_values(&[backend, operation, status.as_str()])
            .inc();
    }

    pub fn record_dump(&self, kind: &str) {
        if !self.is_enabled() {
            return;
        }
        self.dumps_total.with_label_values(&[kind]).inc();
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        if !self.is_enabled() {
            return;
        }
        let result = if hit { "hit" } else { "miss" };
        self.cache_lookups_total.with_label_values(&[result]).inc();
    }

    /// Replace the per-status volume counts
    pub fn update_volume_counts(&self, counts: &[(BackendStatus, usize)]) {
        for status in [BackendStatus::Mounted, BackendStatus::Unmounted, BackendStatus::Error] {
            let count = counts
                .iter()
                .filter(|(s, _)| *s == status)
                .map(|(_, c)| *c)
                .sum::<usize>();
            self.volumes_by_status
                .with_label_values(&[status.as_str()])
                .set(count as f64);
        }
    }

    /// Export metrics in Prometheus format
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            error!("Failed to encode metrics: {}", e);
            return String::new();
        }

        String::from_utf8(buffer).unwrap_or_default()
    }
}
