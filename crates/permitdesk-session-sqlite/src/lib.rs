//! SQLite session storage for single-node PermitDesk deployments
//!
//! This crate implements the `SessionBackend` trait over one SQLite connection
//! shared with the application's business logic.
//!
//! # Features
//! - Shared connection handle that tracks ambient transactions
//! - Native `INSERT ... ON CONFLICT DO UPDATE` upserts
//! - Idempotent, versioned schema bootstrap
//! - WAL journaling
//!
//! # Example
//! ```no_run
//! # use std::sync::Arc;
//! # use permitdesk_core::{SessionHandler, SessionLifecycleAdapter, SessionStoreConfig};
//! # use permitdesk_session_sqlite::{SqliteConnectionConfig, SqliteSessionStore, SqliteSharedConnection};
//! # async fn example() -> permitdesk_core::Result<()> {
//! let conn = SqliteSharedConnection::connect(&SqliteConnectionConfig::new("~/.permitdesk/app.db")).await?;
//! let adapter = SessionLifecycleAdapter::new(
//!     Arc::new(SqliteSessionStore::new(conn.clone())),
//!     &SessionStoreConfig::default(),
//! )?;
//! adapter.bootstrap().await?;
//!
//! // Business logic keeps using `conn` for its own transactions
//! let tx = conn.begin().await?;
//! assert!(adapter.read("sid-1").await.is_empty());
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```

mod connection;
mod sqlite_session_store;

pub use connection::{SqliteAmbientTransaction, SqliteConnectionConfig, SqliteSharedConnection};
pub use sqlite_session_store::SqliteSessionStore;
