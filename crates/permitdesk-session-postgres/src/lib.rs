//! PostgreSQL session storage for shared PermitDesk deployments
//!
//! This crate implements the `SessionBackend` trait over one PostgreSQL
//! connection shared with the application's business logic. The schema is
//! managed by versioned migrations meant to run once at deployment.
//!
//! # Example
//! ```no_run
//! # use std::sync::Arc;
//! # use permitdesk_core::{SessionHandler, SessionLifecycleAdapter, SessionStoreConfig};
//! # use permitdesk_session_postgres::{PgSharedConnection, PostgresSessionStore, PostgresSessionStoreConfig};
//! # async fn example() -> permitdesk_core::Result<()> {
//! let conn = PgSharedConnection::connect(
//!     "postgres://localhost/permitdesk",
//!     &PostgresSessionStoreConfig::default(),
//! )
//! .await?;
//! let adapter = SessionLifecycleAdapter::new(
//!     Arc::new(PostgresSessionStore::new(conn)),
//!     &SessionStoreConfig::default(),
//! )?;
//! adapter.bootstrap().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod connection;
pub mod migrations;
mod postgres_session_store;

pub use config::PostgresSessionStoreConfig;
pub use connection::{PgAmbientTransaction, PgSharedConnection};
pub use postgres_session_store::PostgresSessionStore;
