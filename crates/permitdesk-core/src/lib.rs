//! PermitDesk session store core
//!
//! Transaction-safe session persistence for a web application whose request
//! handlers share one database connection with the session store:
//! - `SessionHandler` lifecycle contract (open/read/write/close/destroy/gc)
//! - `ConflictGuard` ambient transaction detection
//! - Sliding `ExpiryPolicy`
//! - Fail-open `SessionRecordStore` over a pluggable `SessionBackend`
//! - Prometheus metrics
//!
//! # Example
//! ```
//! # use std::sync::Arc;
//! # use permitdesk_core::{SessionHandler, SessionLifecycleAdapter, SessionStoreConfig};
//! # use permitdesk_core::memory::MemorySessionBackend;
//! # async fn example() -> permitdesk_core::Result<()> {
//! let backend = Arc::new(MemorySessionBackend::new());
//! let adapter = SessionLifecycleAdapter::new(backend, &SessionStoreConfig::default())?;
//! adapter.bootstrap().await?;
//!
//! adapter.write("sid-1", b"role=applicant").await;
//! assert_eq!(adapter.read("sid-1").await, b"role=applicant");
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod backend;
pub mod config;
pub mod error;
pub mod expiry;
pub mod guard;
pub mod handler;
pub mod memory;
pub mod metrics;
pub mod store;

pub use adapter::SessionLifecycleAdapter;
pub use backend::{SessionBackend, SessionCounts, SessionRecord};
pub use config::{SessionStoreConfig, WriteConflictPolicy};
pub use error::{Error, Result};
pub use expiry::{Clock, ExpiryPolicy, ManualClock, SystemClock};
pub use guard::{ConflictGuard, GuardDecision, TransactionIndicator, TransactionState};
pub use handler::{SaveContext, SessionHandler};
pub use metrics::SessionStoreMetrics;
pub use store::{ReadOutcome, SessionRecordStore, WriteOutcome};
