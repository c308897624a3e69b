//! SessionLifecycleAdapter - `SessionHandler` implementation over a `SessionBackend`
//!
//! Construct one adapter at service start, call [`SessionLifecycleAdapter::bootstrap`]
//! once, and hand an `Arc` of it to every request handler.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::backend::{SessionBackend, SessionCounts};
use crate::config::{SessionStoreConfig, WriteConflictPolicy};
use crate::expiry::{Clock, ExpiryPolicy, SystemClock};
use crate::handler::{SaveContext, SessionHandler};
use crate::metrics::SessionStoreMetrics;
use crate::store::{ReadOutcome, SessionRecordStore, WriteOutcome};
use crate::{Error, Result};

pub struct SessionLifecycleAdapter {
    store: SessionRecordStore,
    clock: Arc<dyn Clock>,
    write_conflict_policy: WriteConflictPolicy,
    metrics: Option<SessionStoreMetrics>,
    bootstrapped: AtomicBool,
}

impl SessionLifecycleAdapter {
    /// Create an adapter over `backend`.
    ///
    /// # Errors
    /// - `Error::Config` if the configuration is invalid
    pub fn new(backend: Arc<dyn SessionBackend>, config: &SessionStoreConfig) -> Result<Self> {
        config.validate()?;

        let store = SessionRecordStore::new(
            backend,
            ExpiryPolicy::new(config.lifetime()),
            config.operation_timeout(),
        );

        Ok(Self {
            store,
            clock: Arc::new(SystemClock),
            write_conflict_policy: config.write_conflict_policy,
            metrics: None,
            bootstrapped: AtomicBool::new(false),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: SessionStoreMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run the idempotent schema bootstrap once, at deployment or startup.
    ///
    /// # Errors
    /// - `Error::SchemaBootstrap` if the session table cannot be created
    /// - `Error::TransactionConflict` if called inside an ambient transaction
    pub async fn bootstrap(&self) -> Result<()> {
        self.store.ensure_schema().await?;
        self.bootstrapped.store(true, Ordering::Release);
        info!(
            backend = self.store.backend_name(),
            "Session store schema ready"
        );
        Ok(())
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped.load(Ordering::Acquire)
    }

    /// Live and expired row counts at the current instant
    pub async fn stats(&self) -> Result<SessionCounts> {
        self.store.count(self.clock.now()).await
    }

    fn backend(&self) -> &'static str {
        self.store.backend_name()
    }
}

#[async_trait]
impl SessionHandler for SessionLifecycleAdapter {
    async fn open(&self, context: &SaveContext) -> bool {
        if self.is_bootstrapped() {
            return true;
        }

        debug!(
            session_name = %context.session_name,
            "Session store opened before bootstrap, ensuring schema"
        );
        match self.bootstrap().await {
            Ok(()) => true,
            Err(Error::TransactionConflict(reason)) => {
                warn!("Session store not opened: {}", reason);
                false
            }
            Err(e) => {
                error!(backend = self.backend(), "Session store unusable: {}", e);
                false
            }
        }
    }

    async fn read(&self, session_id: &str) -> Vec<u8> {
        let started = Instant::now();
        let outcome = self.store.lookup(session_id, self.clock.now()).await;

        if let Some(metrics) = &self.metrics {
            metrics.record_read(
                self.backend(),
                outcome.label(),
                started.elapsed().as_secs_f64(),
            );
        }

        match outcome {
            ReadOutcome::Hit(record) => record.session_data,
            _ => Vec::new(),
        }
    }

    async fn write(&self, session_id: &str, data: &[u8]) -> bool {
        let started = Instant::now();
        let outcome = self.store.upsert(session_id, data, self.clock.now()).await;

        if let Some(metrics) = &self.metrics {
            metrics.record_write(
                self.backend(),
                outcome.label(),
                started.elapsed().as_secs_f64(),
            );
        }

        match outcome {
            WriteOutcome::Persisted => true,
            WriteOutcome::Conflict => match self.write_conflict_policy {
                WriteConflictPolicy::ReportFailure => false,
                WriteConflictPolicy::Acknowledge => {
                    debug!(session_id, "Acknowledging dropped session write");
                    true
                }
            },
            WriteOutcome::Unavailable => false,
        }
    }

    async fn close(&self) -> bool {
        true
    }

    async fn destroy(&self, session_id: &str) -> bool {
        let (ok, outcome) = match self.store.delete(session_id).await {
            Ok(existed) => {
                debug!(session_id, existed, "Session destroyed");
                (true, "success")
            }
            Err(Error::TransactionConflict(reason)) => {
                warn!(session_id, "Session destroy skipped: {}", reason);
                (false, "conflict")
            }
            Err(e) => {
                warn!(
                    session_id,
                    error_kind = e.kind(),
                    "Session destroy failed: {}",
                    e
                );
                (false, "error")
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_destroy(self.backend(), outcome);
        }
        ok
    }

    async fn gc(&self, max_lifetime_secs: u64) -> Option<u64> {
        // Rows carry their own expiry; the framework's lifetime hint is not used.
        debug!(max_lifetime_secs, "Running session garbage collection");

        let (swept, outcome) = match self.store.sweep(self.clock.now()).await {
            Ok(count) => {
                if count > 0 {
                    info!(
                        backend = self.backend(),
                        "Removed {} expired sessions", count
                    );
                }
                (Some(count), "success")
            }
            Err(Error::TransactionConflict(reason)) => {
                warn!("Session garbage collection skipped: {}", reason);
                (None, "conflict")
            }
            Err(e) => {
                warn!(
                    error_kind = e.kind(),
                    "Session garbage collection failed: {}",
                    e
                );
                (None, "error")
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_gc(self.backend(), outcome, swept.unwrap_or(0));
        }
        swept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expiry::ManualClock;
    use crate::memory::MemorySessionBackend;
    use chrono::{DateTime, TimeDelta, Utc};
    use std::time::Duration;

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
    }

    async fn setup_with(
        config: SessionStoreConfig,
    ) -> (Arc<MemorySessionBackend>, ManualClock, SessionLifecycleAdapter) {
        let backend = Arc::new(MemorySessionBackend::new());
        let clock = ManualClock::new(t0());
        let adapter = SessionLifecycleAdapter::new(backend.clone(), &config)
            .unwrap()
            .with_clock(Arc::new(clock.clone()));
        adapter.bootstrap().await.unwrap();
        (backend, clock, adapter)
    }

    async fn setup() -> (Arc<MemorySessionBackend>, ManualClock, SessionLifecycleAdapter) {
        setup_with(SessionStoreConfig::default()).await
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let backend = Arc::new(MemorySessionBackend::new());
        let config = SessionStoreConfig::new().with_lifetime(Duration::ZERO);
        assert!(SessionLifecycleAdapter::new(backend, &config).is_err());
    }

    #[tokio::test]
    async fn test_open_bootstraps_lazily() {
        let backend = Arc::new(MemorySessionBackend::new());
        let adapter =
            SessionLifecycleAdapter::new(backend.clone(), &SessionStoreConfig::default()).unwrap();

        assert!(!adapter.is_bootstrapped());
        assert!(adapter.open(&SaveContext::new("", "PHPSESSID")).await);
        assert!(adapter.is_bootstrapped());
        assert!(backend.schema_ready().await);
    }

    #[tokio::test]
    async fn test_open_fails_inside_ambient_transaction() {
        let backend = Arc::new(MemorySessionBackend::new());
        let adapter =
            SessionLifecycleAdapter::new(backend.clone(), &SessionStoreConfig::default()).unwrap();

        backend.begin_ambient().await.unwrap();
        assert!(!adapter.open(&SaveContext::default()).await);
        assert!(!backend.schema_ready().await);

        backend.end_ambient().await;
        assert!(adapter.open(&SaveContext::default()).await);
    }

    #[tokio::test]
    async fn test_bootstrap_failure_escalates() {
        let backend = Arc::new(MemorySessionBackend::new());
        let adapter =
            SessionLifecycleAdapter::new(backend.clone(), &SessionStoreConfig::default()).unwrap();

        backend.set_unavailable(true);
        assert!(matches!(
            adapter.bootstrap().await,
            Err(Error::SchemaBootstrap(_))
        ));
        assert!(!adapter.open(&SaveContext::default()).await);
    }

    #[tokio::test]
    async fn test_repeated_writes_keep_one_row() {
        let (backend, _clock, adapter) = setup().await;

        for i in 0..5 {
            assert!(adapter.write("s1", format!("n={}", i).as_bytes()).await);
            assert_eq!(backend.len().await, 1);
        }
        assert_eq!(adapter.read("s1").await, b"n=4");
    }

    #[tokio::test]
    async fn test_read_before_expiry_extends_session() {
        let (backend, clock, adapter) = setup().await;

        assert!(adapter.write("s1", b"a=1").await);

        let read_at = t0() + TimeDelta::hours(23) + TimeDelta::minutes(59);
        clock.set(read_at);
        assert_eq!(adapter.read("s1").await, b"a=1");
        assert_eq!(
            backend.snapshot("s1").await.unwrap().expires_at,
            read_at + TimeDelta::hours(24)
        );
    }

    #[tokio::test]
    async fn test_read_after_lifetime_is_empty() {
        let (_backend, clock, adapter) = setup().await;

        assert!(adapter.write("s1", b"a=1").await);

        clock.set(t0() + TimeDelta::hours(24) + TimeDelta::minutes(1));
        assert!(adapter.read("s1").await.is_empty());
    }

    #[tokio::test]
    async fn test_sliding_expiry_is_non_decreasing() {
        let (backend, clock, adapter) = setup().await;
        assert!(adapter.write("s1", b"a=1").await);

        let mut previous = backend.snapshot("s1").await.unwrap().expires_at;
        for _ in 0..4 {
            clock.advance(Duration::from_secs(6 * 60 * 60));
            assert_eq!(adapter.read("s1").await, b"a=1");
            let current = backend.snapshot("s1").await.unwrap().expires_at;
            assert!(current >= previous);
            previous = current;
        }

        // A full lifetime after the first write, kept alive by the reads
        assert_eq!(adapter.read("s1").await, b"a=1");
    }

    #[tokio::test]
    async fn test_read_inside_ambient_transaction_is_empty() {
        let (backend, _clock, adapter) = setup().await;
        assert!(adapter.write("s1", b"a=1").await);

        backend.begin_ambient().await.unwrap();
        assert!(adapter.read("s1").await.is_empty());

        backend.end_ambient().await;
        assert_eq!(adapter.read("s1").await, b"a=1");
    }

    #[tokio::test]
    async fn test_write_inside_ambient_transaction_never_persists() {
        let (backend, _clock, adapter) = setup().await;

        backend.begin_ambient().await.unwrap();
        assert!(!adapter.write("s2", b"x").await);
        backend.end_ambient().await;

        assert!(adapter.read("s2").await.is_empty());
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_write_conflict_leaves_existing_row_untouched() {
        let (backend, _clock, adapter) = setup().await;
        assert!(adapter.write("s1", b"v1").await);
        let before = backend.snapshot("s1").await.unwrap();

        backend.begin_ambient().await.unwrap();
        assert!(!adapter.write("s1", b"v2").await);
        backend.end_ambient().await;

        assert_eq!(backend.snapshot("s1").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_acknowledge_policy_reports_success() {
        let config =
            SessionStoreConfig::new().with_write_conflict_policy(WriteConflictPolicy::Acknowledge);
        let (backend, _clock, adapter) = setup_with(config).await;

        backend.begin_ambient().await.unwrap();
        assert!(adapter.write("s2", b"x").await);
        backend.end_ambient().await;

        // Acknowledged, but still not persisted
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_storage_failure_on_write_reported_regardless_of_policy() {
        let config =
            SessionStoreConfig::new().with_write_conflict_policy(WriteConflictPolicy::Acknowledge);
        let (backend, _clock, adapter) = setup_with(config).await;

        backend.set_unavailable(true);
        assert!(!adapter.write("s1", b"x").await);
        assert!(adapter.read("s1").await.is_empty());
    }

    #[tokio::test]
    async fn test_last_writer_wins() {
        let (_backend, _clock, adapter) = setup().await;

        assert!(adapter.write("s3", b"v1").await);
        assert!(adapter.write("s3", b"v2").await);
        assert_eq!(adapter.read("s3").await, b"v2");
    }

    #[tokio::test]
    async fn test_destroy_is_terminal() {
        let (backend, _clock, adapter) = setup().await;
        assert!(adapter.write("s1", b"a=1").await);

        assert!(adapter.destroy("s1").await);
        assert!(adapter.read("s1").await.is_empty());
        assert!(backend.snapshot("s1").await.is_none());

        // Destroying an absent session is a no-op success
        assert!(adapter.destroy("s1").await);
    }

    #[tokio::test]
    async fn test_write_after_destroy_recreates_with_fresh_expiry() {
        let (backend, clock, adapter) = setup().await;
        assert!(adapter.write("s1", b"user=42").await);
        assert!(adapter.destroy("s1").await);

        clock.set(t0() + TimeDelta::minutes(5));
        assert!(adapter.write("s1", b"user=7").await);

        let record = backend.snapshot("s1").await.unwrap();
        assert_eq!(record.session_data, b"user=7");
        assert_eq!(record.expires_at, t0() + TimeDelta::minutes(5) + TimeDelta::hours(24));
    }

    #[tokio::test]
    async fn test_destroy_and_gc_denied_inside_ambient_transaction() {
        let (backend, clock, adapter) = setup().await;
        assert!(adapter.write("s1", b"a=1").await);

        backend.begin_ambient().await.unwrap();
        assert!(!adapter.destroy("s1").await);
        clock.advance(Duration::from_secs(48 * 60 * 60));
        assert_eq!(adapter.gc(1440).await, None);
        backend.end_ambient().await;

        assert!(backend.snapshot("s1").await.is_some());
    }

    #[tokio::test]
    async fn test_gc_removes_exactly_expired_rows() {
        let (backend, clock, adapter) = setup().await;

        for id in ["old-1", "old-2", "old-3"] {
            assert!(adapter.write(id, b"stale").await);
        }
        clock.advance(Duration::from_secs(12 * 60 * 60));
        assert!(adapter.write("fresh", b"keep").await);

        clock.set(t0() + TimeDelta::hours(25));
        assert_eq!(adapter.gc(1440).await, Some(3));
        assert_eq!(backend.len().await, 1);
        assert_eq!(adapter.read("fresh").await, b"keep");

        assert_eq!(adapter.gc(1440).await, Some(0));
    }

    #[tokio::test]
    async fn test_close_is_acknowledgment() {
        let (_backend, _clock, adapter) = setup().await;
        assert!(adapter.close().await);
    }

    #[tokio::test]
    async fn test_stats_counts_live_and_expired() {
        let (_backend, clock, adapter) = setup().await;
        assert!(adapter.write("a", b"1").await);
        clock.advance(Duration::from_secs(20 * 60 * 60));
        assert!(adapter.write("b", b"2").await);
        clock.advance(Duration::from_secs(5 * 60 * 60));

        let counts = adapter.stats().await.unwrap();
        assert_eq!(counts, SessionCounts { live: 1, expired: 1 });
    }

    #[tokio::test]
    async fn test_metrics_record_outcomes() {
        let backend = Arc::new(MemorySessionBackend::new());
        let metrics = SessionStoreMetrics::new().unwrap();
        let adapter = SessionLifecycleAdapter::new(backend.clone(), &SessionStoreConfig::default())
            .unwrap()
            .with_metrics(metrics.clone());
        adapter.bootstrap().await.unwrap();

        adapter.write("s1", b"a=1").await;
        adapter.read("s1").await;
        adapter.read("missing").await;
        backend.begin_ambient().await.unwrap();
        adapter.read("s1").await;

        let hits = metrics.reads_total.with_label_values(&["memory", "hit"]).get();
        let misses = metrics.reads_total.with_label_values(&["memory", "miss"]).get();
        let conflicts = metrics
            .reads_total
            .with_label_values(&["memory", "conflict"])
            .get();
        assert_eq!((hits, misses, conflicts), (1.0, 1.0, 1.0));
        assert_eq!(
            metrics
                .writes_total
                .with_label_values(&["memory", "persisted"])
                .get(),
            1.0
        );
    }
}
