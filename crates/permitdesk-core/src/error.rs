//! Error types for the PermitDesk session store

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Unrelated code holds an open transaction on the shared connection
    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Session store operation timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The session table could not be created. The only error allowed to
    /// escape the lifecycle adapter.
    #[error("Schema bootstrap failed: {0}")]
    SchemaBootstrap(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Short label used for metrics and structured log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Error::TransactionConflict(_) => "transaction_conflict",
            Error::StorageUnavailable(_) => "storage_unavailable",
            Error::Timeout(_) => "timeout",
            Error::SchemaBootstrap(_) => "schema_bootstrap",
            Error::Database(_) => "database",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::TransactionConflict(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels() {
        assert_eq!(
            Error::TransactionConflict("write".to_string()).kind(),
            "transaction_conflict"
        );
        assert_eq!(Error::Timeout(Duration::from_millis(5)).kind(), "timeout");
        assert_eq!(
            Error::from(std::io::Error::other("disk gone")).kind(),
            "io"
        );
    }

    #[test]
    fn test_only_transaction_conflict_is_conflict() {
        assert!(Error::TransactionConflict("read".to_string()).is_conflict());
        assert!(!Error::StorageUnavailable("down".to_string()).is_conflict());
        assert!(!Error::SchemaBootstrap("ddl".to_string()).is_conflict());
    }

    #[test]
    fn test_timeout_message_in_millis() {
        assert_eq!(
            Error::Timeout(Duration::from_millis(2_000)).to_string(),
            "Session store operation timed out after 2000ms"
        );
    }
}
