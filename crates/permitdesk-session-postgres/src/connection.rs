//! Shared PostgreSQL connection with ambient transaction tracking

use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Row};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, warn};

use permitdesk_core::{ConflictGuard, Error, Result, TransactionIndicator, TransactionState};

use crate::config::PostgresSessionStoreConfig;

pub(crate) struct SharedState {
    pub(crate) conn: PgConnection,
    pub(crate) tx: TransactionState,
}

impl TransactionIndicator for SharedState {
    fn in_transaction(&self) -> bool {
        self.tx.in_transaction()
    }
}

/// Transaction status reported by the server for the shared connection
struct ServerStatus {
    in_block: bool,
}

impl TransactionIndicator for ServerStatus {
    fn in_transaction(&self) -> bool {
        self.in_block
    }
}

impl SharedState {
    /// Deny `operation` if any transaction is open on the connection.
    ///
    /// The tracked flag covers [`PgSharedConnection::begin`]; the server
    /// check also covers `BEGIN` sent as raw SQL through `lock()`.
    pub(crate) async fn guard(&mut self, operation: &str) -> Result<()> {
        ConflictGuard::check(&*self, operation)?;

        let server = ServerStatus {
            in_block: server_in_transaction(&mut self.conn).await?,
        };
        ConflictGuard::check(&server, operation)
    }
}

/// Whether the server has a transaction block open on `conn`.
///
/// `transaction_timestamp()` equals `statement_timestamp()` during the first
/// statement of a transaction, so they differ only when this query runs after
/// an earlier `BEGIN`. An aborted block rejects every query with 25P02.
async fn server_in_transaction(conn: &mut PgConnection) -> Result<bool> {
    let status = sqlx::Executor::fetch_one(
        &mut *conn,
        sqlx::raw_sql("SELECT transaction_timestamp() <> statement_timestamp()"),
    )
    .await;

    match status {
        Ok(row) => row
            .try_get::<bool, _>(0)
            .map_err(|e| Error::Database(format!("Failed to read transaction status: {}", e))),
        Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some("25P02") => Ok(true),
        Err(e) => Err(Error::Database(format!(
            "Failed to check transaction status: {}",
            e
        ))),
    }
}

/// One PostgreSQL connection shared by business logic and the session store.
///
/// PostgreSQL has no nested transactions, so a session statement issued while
/// business logic holds `BEGIN` would join that transaction. The store backs off
/// from transactions opened through [`PgSharedConnection::begin`] and from a
/// `BEGIN` sent as raw SQL through [`PgSharedConnection::lock`].
#[derive(Clone)]
pub struct PgSharedConnection {
    inner: Arc<Mutex<SharedState>>,
}

impl PgSharedConnection {
    /// Connect to PostgreSQL
    ///
    /// # Errors
    /// - `Error::Config` if the URL cannot be parsed
    /// - `Error::Timeout` if the server does not answer within `connect_timeout`
    /// - `Error::Database` if the connection fails
    pub async fn connect(database_url: &str, config: &PostgresSessionStoreConfig) -> Result<Self> {
        let options = PgConnectOptions::from_str(database_url)
            .map_err(|e| Error::Config(format!("Invalid PostgreSQL URL: {}", e)))?
            .application_name(&config.application_name)
            .options([(
                "statement_timeout",
                format!("{}ms", config.statement_timeout.as_millis()),
            )]);

        let conn = tokio::time::timeout(config.connect_timeout, options.connect())
            .await
            .map_err(|_| Error::Timeout(config.connect_timeout))?
            .map_err(|e| Error::Database(format!("Failed to connect to PostgreSQL: {}", e)))?;

        debug!(
            application_name = %config.application_name,
            "Opened shared PostgreSQL connection"
        );

        Ok(Self {
            inner: Arc::new(Mutex::new(SharedState {
                conn,
                tx: TransactionState::new(),
            })),
        })
    }

    /// Exclusive access to the raw connection for business statements
    pub async fn lock(&self) -> MappedMutexGuard<'_, PgConnection> {
        MutexGuard::map(self.inner.lock().await, |state| &mut state.conn)
    }

    pub(crate) async fn state(&self) -> MutexGuard<'_, SharedState> {
        self.inner.lock().await
    }

    pub async fn in_transaction(&self) -> bool {
        self.inner.lock().await.in_transaction()
    }

    /// Open an ambient transaction visible to the session store
    ///
    /// # Errors
    /// - `Error::Database` if a transaction is already open or `BEGIN` fails
    pub async fn begin(&self) -> Result<PgAmbientTransaction> {
        let mut state = self.inner.lock().await;
        state.tx.mark_open()?;

        if let Err(e) = sqlx::Executor::execute(&mut state.conn, sqlx::raw_sql("BEGIN")).await {
            state.tx.mark_closed();
            return Err(Error::Database(format!("Failed to begin transaction: {}", e)));
        }

        Ok(PgAmbientTransaction {
            inner: self.inner.clone(),
            finished: false,
        })
    }
}

/// Transaction opened by business logic on the shared connection.
///
/// Dropping it without `commit` or `rollback` rolls back on the runtime.
pub struct PgAmbientTransaction {
    inner: Arc<Mutex<SharedState>>,
    finished: bool,
}

impl PgAmbientTransaction {
    pub async fn lock(&self) -> MappedMutexGuard<'_, PgConnection> {
        MutexGuard::map(self.inner.lock().await, |state| &mut state.conn)
    }

    pub async fn commit(mut self) -> Result<()> {
        self.finish("COMMIT").await
    }

    pub async fn rollback(mut self) -> Result<()> {
        self.finish("ROLLBACK").await
    }

    async fn finish(&mut self, statement: &'static str) -> Result<()> {
        self.finished = true;
        let mut state = self.inner.lock().await;

        // PostgreSQL ends the transaction block on COMMIT even when it fails
        let result = sqlx::Executor::execute(&mut state.conn, sqlx::raw_sql(statement)).await;
        if let Err(e) = &result {
            warn!("{} on shared connection failed: {}", statement, e);
        }

        if result.is_ok() {
            state.tx.mark_closed();
        } else {
            match server_in_transaction(&mut state.conn).await {
                Ok(false) => state.tx.mark_closed(),
                Ok(true) => warn!(
                    "Shared connection is still inside a transaction, session I/O stays blocked"
                ),
                Err(e) => warn!("Could not check transaction state: {}", e),
            }
        }

        result
            .map(|_| ())
            .map_err(|e| Error::Database(format!("Failed to {} transaction: {}", statement, e)))
    }
}

impl Drop for PgAmbientTransaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        let inner = self.inner.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let mut state = inner.lock().await;
                    if let Err(e) = sqlx::Executor::execute(&mut state.conn, sqlx::raw_sql("ROLLBACK")).await {
                        warn!("Failed to roll back dropped transaction: {}", e);
                        if !matches!(server_in_transaction(&mut state.conn).await, Ok(false)) {
                            return;
                        }
                    }
                    state.tx.mark_closed();
                });
            }
            Err(_) => {
                warn!("Transaction dropped outside a runtime, shared connection stays in it");
            }
        }
    }
}
