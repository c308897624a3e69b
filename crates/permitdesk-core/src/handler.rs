//! Lifecycle contract invoked by the hosting request framework
//!
//! The framework calls `open` before touching any session field, `read` to
//! hydrate the session, `write` with the final serialized blob before the
//! response is flushed, and `close` at the end of the request. `destroy` is
//! called on logout and `gc` by an out-of-band scheduler.
//!
//! None of the hooks return errors: session bookkeeping must never fail the
//! request that triggered it.

use async_trait::async_trait;

/// Values the framework passes to `open`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveContext {
    /// Framework save path; unused by database-backed stores
    pub save_path: String,
    /// Session cookie name
    pub session_name: String,
}

impl SaveContext {
    pub fn new(save_path: impl Into<String>, session_name: impl Into<String>) -> Self {
        Self {
            save_path: save_path.into(),
            session_name: session_name.into(),
        }
    }
}

#[async_trait]
pub trait SessionHandler: Send + Sync {
    /// Prepare the handler. Returns `false` if no session I/O can work.
    async fn open(&self, context: &SaveContext) -> bool;

    /// Serialized session data, or an empty buffer when there is none
    async fn read(&self, session_id: &str) -> Vec<u8>;

    /// Persist the serialized session. Returns whether the data is durable
    /// (subject to the configured `WriteConflictPolicy`).
    async fn write(&self, session_id: &str, data: &[u8]) -> bool;

    /// End-of-request acknowledgment; durability already happened
    async fn close(&self) -> bool;

    async fn destroy(&self, session_id: &str) -> bool;

    /// Purge expired sessions. `None` signals failure.
    async fn gc(&self, max_lifetime_secs: u64) -> Option<u64>;
}
