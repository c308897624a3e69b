//! Shared SQLite connection with ambient transaction tracking

use sqlx::sqlite::{
    Sqlite, SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqliteSynchronous,
};
use sqlx::{ConnectOptions, Connection, Transaction};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, warn};

use permitdesk_core::{ConflictGuard, Error, Result, TransactionIndicator, TransactionState};

/// Configuration for the shared SQLite connection
///
/// # Example
/// ```
/// use permitdesk_session_sqlite::SqliteConnectionConfig;
/// use std::time::Duration;
///
/// let config = SqliteConnectionConfig::new("/var/lib/permitdesk/app.db")
///     .with_busy_timeout(Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct SqliteConnectionConfig {
    /// Database file; `~` is expanded to the home directory
    pub path: PathBuf,

    /// Use a private in-memory database instead of `path`
    pub in_memory: bool,

    pub create_if_missing: bool,

    /// How long SQLite waits on a locked database before failing
    pub busy_timeout: Duration,

    /// Enable write-ahead logging
    pub wal: bool,
}

impl SqliteConnectionConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            in_memory: false,
            create_if_missing: true,
            busy_timeout: Duration::from_secs(5),
            wal: true,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            in_memory: true,
            wal: false,
            ..Self::new(":memory:")
        }
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    fn connect_options(&self) -> Result<SqliteConnectOptions> {
        let options = if self.in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| Error::Config(format!("Invalid SQLite options: {}", e)))?
        } else {
            SqliteConnectOptions::new()
                .filename(expand_tilde(self.path.clone())?)
                .create_if_missing(self.create_if_missing)
        };

        let journal_mode = if self.wal {
            SqliteJournalMode::Wal
        } else {
            SqliteJournalMode::Delete
        };

        Ok(options
            .journal_mode(journal_mode)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(self.busy_timeout))
    }
}

pub(crate) struct SharedState {
    pub(crate) conn: SqliteConnection,
    pub(crate) tx: TransactionState,
}

impl TransactionIndicator for SharedState {
    fn in_transaction(&self) -> bool {
        self.tx.in_transaction()
    }
}

impl SharedState {
    /// Check the guard and open the store's own transaction for one operation.
    ///
    /// SQLite refuses `BEGIN` while a transaction is open, so a transaction
    /// started with raw SQL through `lock()` is denied here even though the
    /// tracked flag never saw it.
    pub(crate) async fn session_tx(&mut self, operation: &str) -> Result<Transaction<'_, Sqlite>> {
        ConflictGuard::check(&*self, operation)?;

        self.conn.begin().await.map_err(|e| {
            if is_nested_begin(&e) {
                ConflictGuard::denied(operation)
            } else {
                Error::Database(format!("Failed to begin {}: {}", operation, e))
            }
        })
    }
}

fn is_nested_begin(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db| db.message().contains("within a transaction"))
}

/// Whether SQLite still has a transaction open on `conn`.
///
/// Unknown failures count as open.
async fn transaction_active(conn: &mut SqliteConnection) -> bool {
    match conn.begin().await {
        // Dropping the check transaction rolls it back
        Ok(_check) => false,
        Err(e) => {
            if !is_nested_begin(&e) {
                warn!("Could not check transaction state: {}", e);
            }
            true
        }
    }
}

/// One SQLite connection shared by business logic and the session store.
///
/// Business code opens transactions with [`SqliteSharedConnection::begin`]. A
/// `BEGIN` sent as raw SQL through [`SqliteSharedConnection::lock`] is not
/// tracked by the flag, but the store still backs off from it because it
/// cannot open its own transaction inside one.
#[derive(Clone)]
pub struct SqliteSharedConnection {
    inner: Arc<Mutex<SharedState>>,
}

impl SqliteSharedConnection {
    /// Open the connection
    ///
    /// # Errors
    /// - `Error::Io` if the database directory cannot be created
    /// - `Error::Database` if SQLite cannot open the file
    pub async fn connect(config: &SqliteConnectionConfig) -> Result<Self> {
        if !config.in_memory {
            let path = expand_tilde(config.path.clone())?;
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let conn = config
            .connect_options()?
            .connect()
            .await
            .map_err(|e| Error::Database(format!("Failed to open SQLite database: {}", e)))?;

        debug!(path = ?config.path, in_memory = config.in_memory, "Opened shared SQLite connection");

        Ok(Self {
            inner: Arc::new(Mutex::new(SharedState {
                conn,
                tx: TransactionState::new(),
            })),
        })
    }

    /// Exclusive access to the raw connection for business statements
    pub async fn lock(&self) -> MappedMutexGuard<'_, SqliteConnection> {
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
    pub async fn begin(&self) -> Result<SqliteAmbientTransaction> {
        let mut state = self.inner.lock().await;
        state.tx.mark_open()?;

        if let Err(e) = sqlx::raw_sql("BEGIN").execute(&mut state.conn).await {
            state.tx.mark_closed();
            return Err(Error::Database(format!("Failed to begin transaction: {}", e)));
        }

        Ok(SqliteAmbientTransaction {
            inner: self.inner.clone(),
            finished: false,
        })
    }
}

/// Transaction opened by business logic on the shared connection.
///
/// Dropping it without `commit` or `rollback` rolls back on the runtime.
pub struct SqliteAmbientTransaction {
    inner: Arc<Mutex<SharedState>>,
    finished: bool,
}

impl SqliteAmbientTransaction {
    pub async fn lock(&self) -> MappedMutexGuard<'_, SqliteConnection> {
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

        let result = sqlx::raw_sql(statement).execute(&mut state.conn).await;
        if let Err(e) = &result {
            warn!("{} on shared connection failed: {}", statement, e);
            if statement == "COMMIT" {
                // A failed COMMIT can leave SQLite inside the transaction
                if let Err(e) = sqlx::raw_sql("ROLLBACK").execute(&mut state.conn).await {
                    warn!("Rollback after failed commit failed: {}", e);
                }
            }
        }

        if result.is_ok() || !transaction_active(&mut state.conn).await {
            state.tx.mark_closed();
        } else {
            warn!("Shared connection is still inside a transaction, session I/O stays blocked");
        }

        result
            .map(|_| ())
            .map_err(|e| Error::Database(format!("Failed to {} transaction: {}", statement, e)))
    }
}

impl Drop for SqliteAmbientTransaction {
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
                        if transaction_active(&mut state.conn).await {
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

/// Expand tilde (~) in path
fn expand_tilde(path: PathBuf) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;
            Ok(home.join(rest))
        }
        Err(_) => Ok(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn business_table(conn: &SqliteSharedConnection) {
        sqlx::query("CREATE TABLE permits (id INTEGER PRIMARY KEY, title TEXT NOT NULL)")
            .execute(&mut *conn.lock().await)
            .await
            .unwrap();
    }

    async fn permit_count(conn: &SqliteSharedConnection) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM permits")
            .fetch_one(&mut *conn.lock().await)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_connect_creates_parent_directory() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("app.db");

        let conn = SqliteSharedConnection::connect(&SqliteConnectionConfig::new(&db_path))
            .await
            .unwrap();

        assert!(db_path.exists());
        assert!(!conn.in_transaction().await);
    }

    #[tokio::test]
    async fn test_begin_and_commit_tracks_state() {
        let conn = SqliteSharedConnection::connect(&SqliteConnectionConfig::in_memory())
            .await
            .unwrap();
        business_table(&conn).await;

        let tx = conn.begin().await.unwrap();
        assert!(conn.in_transaction().await);
        sqlx::query("INSERT INTO permits (title) VALUES ('fence')")
            .execute(&mut *tx.lock().await)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert!(!conn.in_transaction().await);
        assert_eq!(permit_count(&conn).await, 1);
    }

    #[tokio::test]
    async fn test_nested_begin_rejected() {
        let conn = SqliteSharedConnection::connect(&SqliteConnectionConfig::in_memory())
            .await
            .unwrap();

        let tx = conn.begin().await.unwrap();
        assert!(matches!(conn.begin().await, Err(Error::Database(_))));
        tx.rollback().await.unwrap();
        assert!(conn.begin().await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let conn = SqliteSharedConnection::connect(&SqliteConnectionConfig::in_memory())
            .await
            .unwrap();
        business_table(&conn).await;

        {
            let tx = conn.begin().await.unwrap();
            sqlx::query("INSERT INTO permits (title) VALUES ('shed')")
                .execute(&mut *tx.lock().await)
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!conn.in_transaction().await);
        assert_eq!(permit_count(&conn).await, 0);
    }

    #[tokio::test]
    async fn test_failed_commit_clears_flag_once_transaction_is_gone() {
        let conn = SqliteSharedConnection::connect(&SqliteConnectionConfig::in_memory())
            .await
            .unwrap();
        business_table(&conn).await;

        let tx = conn.begin().await.unwrap();
        // Ends the transaction behind the tracked flag's back
        sqlx::raw_sql("ROLLBACK")
            .execute(&mut *tx.lock().await)
            .await
            .unwrap();

        assert!(matches!(tx.commit().await, Err(Error::Database(_))));
        assert!(!conn.in_transaction().await);

        let tx = conn.begin().await.unwrap();
        sqlx::query("INSERT INTO permits (title) VALUES ('porch')")
            .execute(&mut *tx.lock().await)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(permit_count(&conn).await, 1);
    }

    #[tokio::test]
    async fn test_session_tx_denied_by_raw_begin() {
        let conn = SqliteSharedConnection::connect(&SqliteConnectionConfig::in_memory())
            .await
            .unwrap();

        sqlx::raw_sql("BEGIN")
            .execute(&mut *conn.lock().await)
            .await
            .unwrap();
        assert!(!conn.in_transaction().await);

        {
            let mut state = conn.state().await;
            assert!(matches!(
                state.session_tx("upsert").await,
                Err(Error::TransactionConflict(_))
            ));
        }

        sqlx::raw_sql("ROLLBACK")
            .execute(&mut *conn.lock().await)
            .await
            .unwrap();

        let mut state = conn.state().await;
        let tx = state.session_tx("upsert").await.unwrap();
        tx.commit().await.unwrap();
    }

    #[test]
    fn test_expand_tilde() {
        let plain = expand_tilde(PathBuf::from("/tmp/app.db")).unwrap();
        assert_eq!(plain, PathBuf::from("/tmp/app.db"));

        if let Some(home) = dirs::home_dir() {
            let expanded = expand_tilde(PathBuf::from("~/app.db")).unwrap();
            assert_eq!(expanded, home.join("app.db"));
        }
    }
}
