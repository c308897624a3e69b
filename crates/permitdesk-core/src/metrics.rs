//! Metrics for the session store
//!
//! Provides Prometheus metrics for monitoring session bookkeeping:
//! - Read outcomes (hit, miss, conflict, error)
//! - Write and destroy outcomes
//! - Garbage collection runs and rows swept
//! - Operation latency

use prometheus::{CounterVec, HistogramOpts, HistogramVec, IntCounter, Opts, Registry};
use std::sync::Arc;

/// Metrics collector for the session store
#[derive(Clone)]
pub struct SessionStoreMetrics {
    registry: Arc<Registry>,

    /// Reads by outcome
    pub reads_total: CounterVec,
    /// Writes by outcome
    pub writes_total: CounterVec,
    /// Destroys by outcome
    pub destroys_total: CounterVec,
    /// Garbage collection runs by outcome
    pub gc_runs_total: CounterVec,
    /// Expired rows physically removed
    pub sessions_swept_total: IntCounter,
    /// Store operation duration
    pub operation_duration_seconds: HistogramVec,
}

impl SessionStoreMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reads_total = CounterVec::new(
            Opts::new(
                "session_store_reads_total",
                "Total number of session reads by outcome",
            ),
            &["backend", "outcome"],
        )?;

        let writes_total = CounterVec::new(
            Opts::new(
                "session_store_writes_total",
                "Total number of session writes by outcome",
            ),
            &["backend", "outcome"],
        )?;

        let destroys_total = CounterVec::new(
            Opts::new(
                "session_store_destroys_total",
                "Total number of session destroys by outcome",
            ),
            &["backend", "outcome"],
        )?;

        let gc_runs_total = CounterVec::new(
            Opts::new(
                "session_store_gc_runs_total",
                "Total number of garbage collection runs by outcome",
            ),
            &["backend", "outcome"],
        )?;

        let sessions_swept_total = IntCounter::new(
            "session_store_sessions_swept_total",
            "Total number of expired sessions removed by garbage collection",
        )?;

        let operation_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "session_store_operation_duration_seconds",
                "Session store operation duration in seconds",
            )
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.5, 1.0,
            ]),
            &["operation"],
        )?;

        registry.register(Box::new(reads_total.clone()))?;
        registry.register(Box::new(writes_total.clone()))?;
        registry.register(Box::new(destroys_total.clone()))?;
        registry.register(Box::new(gc_runs_total.clone()))?;
        registry.register(Box::new(sessions_swept_total.clone()))?;
        registry.register(Box::new(operation_duration_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            reads_total,
            writes_total,
            destroys_total,
            gc_runs_total,
            sessions_swept_total,
            operation_duration_seconds,
        })
    }

    /// Get the Prometheus registry for exporting metrics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_read(&self, backend: &str, outcome: &str, duration_secs: f64) {
        self.reads_total
            .with_label_values(&[backend, outcome])
            .inc();
        self.operation_duration_seconds
            .with_label_values(&["read"])
            .observe(duration_secs);
    }

    pub fn record_write(&self, backend: &str, outcome: &str, duration_secs: f64) {
        self.writes_total
            .with_label_values(&[backend, outcome])
            .inc();
        self.operation_duration_seconds
            .with_label_values(&["write"])
            .observe(duration_secs);
    }

    pub fn record_destroy(&self, backend: &str, outcome: &str) {
        self.destroys_total
            .with_label_values(&[backend, outcome])
            .inc();
    }

    pub fn record_gc(&self, backend: &str, outcome: &str, swept: u64) {
        self.gc_runs_total
            .with_label_values(&[backend, outcome])
            .inc();
        self.sessions_swept_total.inc_by(swept);
    }
}
