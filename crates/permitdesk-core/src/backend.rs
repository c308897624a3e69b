//! Storage seam for session records
//!
//! The `SessionBackend` trait abstracts the persisted session table so the
//! same lifecycle logic runs against SQLite (single-node deployments) and
//! PostgreSQL (shared deployments).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::Result;

/// The only persisted entity: one row per session id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// Opaque id generated by the hosting framework (primary key)
    pub session_id: String,
    /// Opaque serialized session blob, never parsed by the store
    pub session_data: Vec<u8>,
    pub expires_at: DateTime<Utc>,
}

/// Row counts split by liveness at a given instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounts {
    pub live: u64,
    pub expired: u64,
}

/// Session table backend
///
/// Implementations:
/// - `SqliteSessionStore`: SQLite over a shared `SqliteConnection`
/// - `PostgresSessionStore`: PostgreSQL over a shared `PgConnection`
///
/// Every method must consult the `ConflictGuard` while holding the shared
/// connection, and return `Error::TransactionConflict` instead of touching the
/// connection when an ambient transaction is open.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Backend name for logs and metrics
    fn name(&self) -> &'static str;

    /// Create the session table if absent. Must be idempotent.
    ///
    /// # Errors
    /// - `Error::TransactionConflict` if an ambient transaction is open
    /// - `Error::Database` if the DDL fails
    async fn ensure_schema(&self) -> Result<()>;

    /// Fetch a record and, if it is still live at `now`, move its expiry
    /// forward to `extend_to` in the same connection critical section.
    ///
    /// The extension is best-effort: if the update fails the record is still
    /// returned with its previous `expires_at`. Expired rows are returned
    /// untouched so the caller can decide they are dead.
    ///
    /// # Errors
    /// - `Error::TransactionConflict` if an ambient transaction is open
    /// - `Error::Database` for read errors
    async fn lookup(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
        extend_to: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>>;

    /// Insert a record, or replace data and expiry when the id exists.
    ///
    /// Must use the database's native insert-or-update primitive.
    async fn upsert(&self, session_id: &str, data: &[u8], expires_at: DateTime<Utc>)
        -> Result<()>;

    /// Delete a record. Returns whether a row was removed.
    async fn delete(&self, session_id: &str) -> Result<bool>;

    /// Delete every row with `expires_at <= now`, returning the count removed
    async fn sweep(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Count live and expired rows at `now`
    async fn count(&self, now: DateTime<Utc>) -> Result<SessionCounts>;
}
