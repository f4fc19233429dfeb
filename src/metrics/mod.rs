//! Prometheus metrics for dibi sessions
//!
//! Rendered in the text exposition format by [`Metrics::gather`].

use prometheus::{Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::OnceLock;
use tracing::warn;

/// Global metrics registry
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Get the global metrics instance
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

/// dibi metrics collection
pub struct Metrics {
    /// Registry for all metrics
    pub registry: Registry,

    // Connection metrics
    /// Currently open database connections
    pub connections_active: IntGauge,
    /// Connections opened, tunneled or not
    pub connections_opened: IntCounterVec,

    // Job metrics
    /// Jobs processed by kind
    pub jobs_total: IntCounterVec,
    /// Job errors by type
    pub job_errors_total: IntCounterVec,

    // Statement metrics
    /// Statement latency histogram (in seconds)
    pub statement_duration_seconds: Histogram,
}

impl Metrics {
    /// Create a new metrics collection
    pub fn new() -> Self {
        let registry = Registry::new();

        let connections_active = IntGauge::new(
            "dibi_connections_active",
            "Current number of open database connections",
        )
        .unwrap();

        let connections_opened = IntCounterVec::new(
            Opts::new(
                "dibi_connections_opened_total",
                "Total number of database connections opened",
            ),
            &["route"], // direct, tunnel
        )
        .unwrap();

        let jobs_total = IntCounterVec::new(
            Opts::new("dibi_jobs_total", "Total number of session jobs processed"),
            &["kind"],
        )
        .unwrap();

        let job_errors_total = IntCounterVec::new(
            Opts::new("dibi_job_errors_total", "Total number of failed session jobs"),
            &["type"], // no_connection, statement, pipe_command, etc.
        )
        .unwrap();

        let statement_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "dibi_statement_duration_seconds",
                "Statement latency in seconds",
            )
            .buckets(vec![
                0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
            ]),
        )
        .unwrap();

        registry
            .register(Box::new(connections_active.clone()))
            .unwrap();
        registry
            .register(Box::new(connections_opened.clone()))
            .unwrap();
        registry.register(Box::new(jobs_total.clone())).unwrap();
        registry
            .register(Box::new(job_errors_total.clone()))
            .unwrap();
        registry
            .register(Box::new(statement_duration_seconds.clone()))
            .unwrap();

        Self {
            registry,
            connections_active,
            connections_opened,
            jobs_total,
            job_errors_total,
            statement_duration_seconds,
        }
    }

    /// Record a job taken off a session queue
    pub fn record_job(&self, kind: &str) {
        self.jobs_total.with_label_values(&[kind]).inc();
    }

    /// Record a failed job
    pub fn record_job_error(&self, error_type: &str) {
        self.job_errors_total.with_label_values(&[error_type]).inc();
    }

    /// Record one statement round trip
    pub fn record_statement(&self, duration_secs: f64) {
        self.statement_duration_seconds.observe(duration_secs);
    }

    /// Record a new database connection
    pub fn record_connection_opened(&self, tunneled: bool) {
        let route = if tunneled { "tunnel" } else { "direct" };
        self.connections_opened.with_label_values(&[route]).inc();
        self.connections_active.inc();
    }

    /// Record a connection closed
    pub fn record_connection_closed(&self) {
        self.connections_active.dec();
    }

    /// Get metrics as Prometheus text format
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
