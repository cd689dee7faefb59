// src/metrics/collector.rs
use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn gather(&self) -> Vec<u8> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
        }
        buffer
    }
}

pub struct MetricsCollector {
    // Client operation metrics
    pub operations_total: IntCounterVec,
    pub operation_duration_seconds: HistogramVec,

    // Backend pool metrics
    pub backend_connect_failures_total: IntCounterVec,
    pub heartbeat_failures_total: IntCounterVec,
    pub pool_idle_connections: IntGaugeVec,

    // Client sessions
    pub active_sessions: IntGauge,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let operations_total = IntCounterVec::new(
            Opts::new("ldap_proxy_operations_total", "Client operations by type and outcome"),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let operation_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "ldap_proxy_operation_duration_seconds",
                "Time from dispatch to terminal result",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration_seconds.clone()))?;

        let backend_connect_failures_total = IntCounterVec::new(
            Opts::new(
                "ldap_proxy_backend_connect_failures_total",
                "Failed attempts to open a backend connection",
            ),
            &["pool", "endpoint"],
        )?;
        registry.register(Box::new(backend_connect_failures_total.clone()))?;

        let heartbeat_failures_total = IntCounterVec::new(
            Opts::new(
                "ldap_proxy_heartbeat_failures_total",
                "Idle connections dropped after a failed heartbeat",
            ),
            &["pool", "endpoint"],
        )?;
        registry.register(Box::new(heartbeat_failures_total.clone()))?;

        let pool_idle_connections = IntGaugeVec::new(
            Opts::new("ldap_proxy_pool_idle_connections", "Idle pooled connections"),
            &["pool", "endpoint"],
        )?;
        registry.register(Box::new(pool_idle_connections.clone()))?;

        let active_sessions =
            IntGauge::new("ldap_proxy_active_sessions", "Connected client sessions")?;
        registry.register(Box::new(active_sessions.clone()))?;

        Ok(Self {
            operations_total,
            operation_duration_seconds,
            backend_connect_failures_total,
            heartbeat_failures_total,
            pool_idle_connections,
            active_sessions,
        })
    }

    pub fn record_operation(&self, operation: &str, outcome: &str, duration: Duration) {
        self.operations_total
            .with_label_values(&[operation, outcome])
            .inc();
        self.operation_duration_seconds
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }

    pub fn record_connect_failure(&self, pool: &str, endpoint: &str) {
        self.backend_connect_failures_total
            .with_label_values(&[pool, endpoint])
            .inc();
    }

    pub fn record_heartbeat_failure(&self, pool: &str, endpoint: &str) {
        self.heartbeat_failures_total
            .with_label_values(&[pool, endpoint])
            .inc();
    }

    pub fn set_idle_connections(&self, pool: &str, endpoint: &str, idle: usize) {
        self.pool_idle_connections
            .with_label_values(&[pool, endpoint])
            .set(idle as i64);
    }

    pub fn session_opened(&self) {
        self.active_sessions.inc();
    }

    pub fn session_closed(&self) {
        self.active_sessions.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposes_recorded_operations() {
        let registry = MetricsRegistry::new().unwrap();
        let metrics = registry.collector();

        metrics.record_operation("search", "success", Duration::from_millis(3));
        metrics.record_operation("search", "success", Duration::from_millis(5));
        metrics.record_connect_failure("general", "ldap1:389");
        metrics.session_opened();

        assert_eq!(
            metrics
                .operations_total
                .with_label_values(&["search", "success"])
                .get(),
            2
        );
        assert_eq!(metrics.active_sessions.get(), 1);

        let text = String::from_utf8(registry.gather()).unwrap();
        assert!(text.contains("ldap_proxy_operations_total"));
        assert!(text.contains("endpoint=\"ldap1:389\""));
    }
}
