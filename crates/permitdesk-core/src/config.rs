//! Session store configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{Error, Result};

/// What `write` reports when the guard denies it.
///
/// Neither policy retries or queues the write; the session changes of that
/// request are dropped either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WriteConflictPolicy {
    /// `write` returns `false` so the framework can tell the data was not saved
    #[default]
    ReportFailure,
    /// `write` returns `true` after logging, for frameworks that raise
    /// warnings on a failed write
    Acknowledge,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStoreConfig {
    /// Sliding session lifetime in seconds
    #[serde(default = "default_lifetime_secs")]
    pub lifetime_secs: u64,

    /// Upper bound for any single store operation, in milliseconds
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,

    #[serde(default)]
    pub write_conflict_policy: WriteConflictPolicy,
}

fn default_lifetime_secs() -> u64 {
    24 * 60 * 60
}

fn default_operation_timeout_ms() -> u64 {
    2_000
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            lifetime_secs: default_lifetime_secs(),
            operation_timeout_ms: default_operation_timeout_ms(),
            write_conflict_policy: WriteConflictPolicy::default(),
        }
    }
}

impl SessionStoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime_secs = lifetime.as_secs();
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_write_conflict_policy(mut self, policy: WriteConflictPolicy) -> Self {
        self.write_conflict_policy = policy;
        self
    }

    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.lifetime_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lifetime_secs == 0 {
            return Err(Error::Config("lifetime_secs must be at least 1".to_string()));
        }
        if self.operation_timeout_ms == 0 {
            return Err(Error::Config(
                "operation_timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
