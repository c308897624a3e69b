//! Fail-open wrapper around a `SessionBackend`
//!
//! Storage failures, timeouts and transaction conflicts on the read and write
//! paths are absorbed here and reported through `tracing`. Callers only see an
//! outcome telling them whether data came back or was persisted.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::backend::{SessionBackend, SessionCounts, SessionRecord};
use crate::expiry::ExpiryPolicy;
use crate::{Error, Result};

/// Result of a session lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Live record, expiry already extended (best effort)
    Hit(SessionRecord),
    /// No row, or the row is expired
    Miss,
    /// Ambient transaction open; treated as absent
    Conflict,
    /// Storage error or timeout; treated as absent
    Unavailable,
}

impl ReadOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ReadOutcome::Hit(_) => "hit",
            ReadOutcome::Miss => "miss",
            ReadOutcome::Conflict => "conflict",
            ReadOutcome::Unavailable => "error",
        }
    }
}

/// Result of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Persisted,
    /// Ambient transaction open; nothing was written
    Conflict,
    /// Storage error or timeout; the row may or may not have been written
    Unavailable,
}

impl WriteOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            WriteOutcome::Persisted => "persisted",
            WriteOutcome::Conflict => "conflict",
            WriteOutcome::Unavailable => "error",
        }
    }
}

/// Durable CRUD over session records with bounded operation time
#[derive(Clone)]
pub struct SessionRecordStore {
    backend: Arc<dyn SessionBackend>,
    policy: ExpiryPolicy,
    timeout: Duration,
}

impl SessionRecordStore {
    pub fn new(backend: Arc<dyn SessionBackend>, policy: ExpiryPolicy, timeout: Duration) -> Self {
        Self {
            backend,
            policy,
            timeout,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    async fn bounded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| Error::Timeout(self.timeout))?
    }

    /// Create the session table if absent.
    ///
    /// Conflicts are passed through unchanged; any other failure becomes
    /// `Error::SchemaBootstrap`.
    pub async fn ensure_schema(&self) -> Result<()> {
        match self.bounded(self.backend.ensure_schema()).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_conflict() => Err(e),
            Err(e) => Err(Error::SchemaBootstrap(e.to_string())),
        }
    }

    pub async fn lookup(&self, session_id: &str, now: DateTime<Utc>) -> ReadOutcome {
        let extend_to = self.policy.next_expiry(now);
        match self
            .bounded(self.backend.lookup(session_id, now, extend_to))
            .await
        {
            Ok(Some(record)) if !self.policy.is_expired(&record, now) => ReadOutcome::Hit(record),
            Ok(_) => ReadOutcome::Miss,
            Err(Error::TransactionConflict(reason)) => {
                debug!(session_id, "Session read treated as empty: {}", reason);
                ReadOutcome::Conflict
            }
            Err(e) => {
                warn!(
                    session_id,
                    backend = self.backend.name(),
                    error_kind = e.kind(),
                    "Session read failed, treating as empty: {}",
                    e
                );
                ReadOutcome::Unavailable
            }
        }
    }

    pub async fn upsert(&self, session_id: &str, data: &[u8], now: DateTime<Utc>) -> WriteOutcome {
        let expires_at = self.policy.next_expiry(now);
        match self
            .bounded(self.backend.upsert(session_id, data, expires_at))
            .await
        {
            Ok(()) => WriteOutcome::Persisted,
            Err(Error::TransactionConflict(reason)) => {
                warn!(session_id, "Session write not persisted: {}", reason);
                WriteOutcome::Conflict
            }
            Err(e) => {
                warn!(
                    session_id,
                    backend = self.backend.name(),
                    error_kind = e.kind(),
                    "Session write failed: {}",
                    e
                );
                WriteOutcome::Unavailable
            }
        }
    }

    /// Remove a record. Absent ids are a successful no-op.
    pub async fn delete(&self, session_id: &str) -> Result<bool> {
        self.bounded(self.backend.delete(session_id)).await
    }

    /// Remove all rows expired at `now`
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<u64> {
        self.bounded(self.backend.sweep(now)).await
    }

    pub async fn count(&self, now: DateTime<Utc>) -> Result<SessionCounts> {
        self.bounded(self.backend.count(now)).await
    }
}
