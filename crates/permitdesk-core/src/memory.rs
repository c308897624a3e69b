//! In-memory `SessionBackend`
//!
//! Behaves like the SQL backends, including the ambient transaction check, so
//! frameworks can exercise the lifecycle without a database. Failure and
//! latency injection make the fail-open paths testable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::backend::{SessionBackend, SessionCounts, SessionRecord};
use crate::guard::{ConflictGuard, TransactionState};
use crate::{Error, Result};

#[derive(Debug, Default)]
struct MemoryState {
    rows: HashMap<String, SessionRecord>,
    tx: TransactionState,
    schema_ready: bool,
}

#[derive(Debug, Default)]
pub struct MemorySessionBackend {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
}

impl MemorySessionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate business logic opening a transaction on the shared connection
    pub async fn begin_ambient(&self) -> Result<()> {
        self.state.lock().await.tx.mark_open()
    }

    pub async fn end_ambient(&self) {
        self.state.lock().await.tx.mark_closed();
    }

    /// Make every operation fail with `Error::StorageUnavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every operation while holding the connection
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Raw row access without expiry handling or extension
    pub async fn snapshot(&self, session_id: &str) -> Option<SessionRecord> {
        self.state.lock().await.rows.get(session_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn schema_ready(&self) -> bool {
        self.state.lock().await.schema_ready
    }

    async fn acquire(&self, operation: &str) -> Result<tokio::sync::MutexGuard<'_, MemoryState>> {
        let state = self.state.lock().await;
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        ConflictGuard::check(&state.tx, operation)?;
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::StorageUnavailable(format!(
                "{} failed: memory backend marked unavailable",
                operation
            )));
        }
        Ok(state)
    }
}

#[async_trait]
impl SessionBackend for MemorySessionBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ensure_schema(&self) -> Result<()> {
        let mut state = self.acquire("ensure_schema").await?;
        state.schema_ready = true;
        Ok(())
    }

    async fn lookup(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
        extend_to: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>> {
        let mut state = self.acquire("lookup").await?;
        Ok(state.rows.get_mut(session_id).map(|record| {
            if record.expires_at > now {
                record.expires_at = record.expires_at.max(extend_to);
            }
            record.clone()
        }))
    }

    async fn upsert(
        &self,
        session_id: &str,
        data: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.acquire("upsert").await?;
        state.rows.insert(
            session_id.to_string(),
            SessionRecord {
                session_id: session_id.to_string(),
                session_data: data.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        let mut state = self.acquire("delete").await?;
        Ok(state.rows.remove(session_id).is_some())
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.acquire("sweep").await?;
        let before = state.rows.len();
        state.rows.retain(|_, record| record.expires_at > now);
        Ok((before - state.rows.len()) as u64)
    }

    async fn count(&self, now: DateTime<Utc>) -> Result<SessionCounts> {
        let state = self.acquire("count").await?;
        let live = state.rows.values().filter(|r| r.expires_at > now).count() as u64;
        Ok(SessionCounts {
            live,
            expired: state.rows.len() as u64 - live,
        })
    }
}
