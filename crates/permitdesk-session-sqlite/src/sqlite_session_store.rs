//! SqliteSessionStore - SessionBackend trait implementation for SQLite

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnection;
use tracing::{info, warn};

use permitdesk_core::{Error, Result, SessionBackend, SessionCounts, SessionRecord};

use crate::connection::{SqliteConnectionConfig, SqliteSharedConnection};

const SCHEMA_VERSION: i64 = 1;

/// SQLite session store over a connection shared with business logic
#[derive(Clone)]
pub struct SqliteSessionStore {
    conn: SqliteSharedConnection,
}

impl SqliteSessionStore {
    pub fn new(conn: SqliteSharedConnection) -> Self {
        Self { conn }
    }

    /// Open a dedicated connection and wrap it
    ///
    /// # Errors
    /// - `Error::Database` if SQLite connection fails
    pub async fn connect(config: &SqliteConnectionConfig) -> Result<Self> {
        Ok(Self::new(SqliteSharedConnection::connect(config).await?))
    }

    /// Get the shared connection
    pub fn connection(&self) -> &SqliteSharedConnection {
        &self.conn
    }

    async fn initialize_schema(conn: &mut SqliteConnection) -> Result<()> {
        // Schema version table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session_schema_version (
                version INTEGER PRIMARY KEY
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| Error::Database(format!("Failed to create schema version table: {}", e)))?;

        sqlx::query("INSERT OR IGNORE INTO session_schema_version (version) VALUES (?)")
            .bind(SCHEMA_VERSION)
            .execute(&mut *conn)
            .await
            .map_err(|e| Error::Database(format!("Failed to record schema version: {}", e)))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY NOT NULL,
                data BLOB NOT NULL,
                expires_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| Error::Database(format!("Failed to create sessions table: {}", e)))?;

        // Sweeps scan by expiry
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at)")
            .execute(&mut *conn)
            .await
            .map_err(|e| Error::Database(format!("Failed to create expiry index: {}", e)))?;

        let version: i64 = sqlx::query_scalar("SELECT MAX(version) FROM session_schema_version")
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        if version != SCHEMA_VERSION {
            return Err(Error::Database(format!(
                "Unsupported session schema version: {}",
                version
            )));
        }

        Ok(())
    }
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default()
}

#[async_trait]
impl SessionBackend for SqliteSessionStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn ensure_schema(&self) -> Result<()> {
        let mut state = self.conn.state().await;
        let mut tx = state.session_tx("ensure_schema").await?;

        Self::initialize_schema(&mut *tx).await?;
        tx.commit()
            .await
            .map_err(|e| Error::Database(format!("Failed to commit session schema: {}", e)))?;

        info!("SQLite session schema at version {}", SCHEMA_VERSION);
        Ok(())
    }

    async fn lookup(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
        extend_to: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>> {
        let mut state = self.conn.state().await;
        let mut tx = state.session_tx("lookup").await?;

        let row: Option<(String, Vec<u8>, i64)> =
            sqlx::query_as("SELECT id, data, expires_at FROM sessions WHERE id = ?")
                .bind(session_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| Error::Database(format!("Failed to read session: {}", e)))?;

        let Some((id, data, expires_at)) = row else {
            return Ok(None);
        };

        let mut expires_at = from_unix(expires_at);
        if expires_at > now {
            let updated =
                sqlx::query("UPDATE sessions SET expires_at = MAX(expires_at, ?) WHERE id = ?")
                    .bind(extend_to.timestamp())
                    .bind(session_id)
                    .execute(&mut *tx)
                    .await;
            let extended = match updated {
                Ok(_) => tx.commit().await,
                Err(e) => Err(e),
            };

            // The row was read; a failed refresh only costs the extension
            match extended {
                Ok(()) => expires_at = expires_at.max(from_unix(extend_to.timestamp())),
                Err(e) => warn!(session_id, "Failed to extend session expiry: {}", e),
            }
        }

        Ok(Some(SessionRecord {
            session_id: id,
            session_data: data,
            expires_at,
        }))
    }

    async fn upsert(
        &self,
        session_id: &str,
        data: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.conn.state().await;
        let mut tx = state.session_tx("upsert").await?;

        sqlx::query(
            r#"
            INSERT INTO sessions (id, data, expires_at) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                data = excluded.data,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(session_id)
        .bind(data)
        .bind(expires_at.timestamp())
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Database(format!("Failed to write session: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| Error::Database(format!("Failed to commit session write: {}", e)))
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        let mut state = self.conn.state().await;
        let mut tx = state.session_tx("delete").await?;

        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Database(format!("Failed to delete session: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| Error::Database(format!("Failed to commit session delete: {}", e)))?;
        Ok(result.rows_affected() > 0)
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.conn.state().await;
        let mut tx = state.session_tx("sweep").await?;

        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now.timestamp())
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Database(format!("Failed to sweep sessions: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| Error::Database(format!("Failed to commit session sweep: {}", e)))?;
        Ok(result.rows_affected())
    }

    async fn count(&self, now: DateTime<Utc>) -> Result<SessionCounts> {
        let mut state = self.conn.state().await;
        let mut tx = state.session_tx("count").await?;

        let (live, expired): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN expires_at > ? THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN expires_at <= ? THEN 1 ELSE 0 END), 0)
            FROM sessions
            "#,
        )
        .bind(now.timestamp())
        .bind(now.timestamp())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| Error::Database(format!("Failed to count sessions: {}", e)))?;

        Ok(SessionCounts {
            live: live.max(0) as u64,
            expired: expired.max(0) as u64,
        })
    }
}
