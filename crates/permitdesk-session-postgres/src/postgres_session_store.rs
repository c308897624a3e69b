//! PostgresSessionStore - SessionBackend trait implementation for PostgreSQL

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use permitdesk_core::{Error, Result, SessionBackend, SessionCounts, SessionRecord};

use crate::config::PostgresSessionStoreConfig;
use crate::connection::PgSharedConnection;
use crate::migrations;

/// PostgreSQL session store over a connection shared with business logic
#[derive(Clone)]
pub struct PostgresSessionStore {
    conn: PgSharedConnection,
}

impl PostgresSessionStore {
    pub fn new(conn: PgSharedConnection) -> Self {
        Self { conn }
    }

    /// Open a dedicated connection and wrap it
    ///
    /// # Errors
    /// - `Error::Database` if connection fails
    pub async fn connect(database_url: &str, config: &PostgresSessionStoreConfig) -> Result<Self> {
        Ok(Self::new(PgSharedConnection::connect(database_url, config).await?))
    }

    /// Get the shared connection
    pub fn connection(&self) -> &PgSharedConnection {
        &self.conn
    }

    /// Highest applied migration, `None` before the first bootstrap
    pub async fn schema_version(&self) -> Result<Option<i32>> {
        let mut state = self.conn.state().await;
        state.guard("schema_version").await?;
        migrations::get_current_version(&mut state.conn).await
    }
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default()
}

#[async_trait]
impl SessionBackend for PostgresSessionStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn ensure_schema(&self) -> Result<()> {
        let mut state = self.conn.state().await;
        state.guard("ensure_schema").await?;

        let applied = migrations::run_migrations(&mut state.conn).await?;
        if applied > 0 {
            info!("Applied {} session store migrations", applied);
        }
        Ok(())
    }

    async fn lookup(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
        extend_to: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>> {
        let mut state = self.conn.state().await;
        state.guard("lookup").await?;

        let row: Option<(String, Vec<u8>, i64)> =
            sqlx::query_as("SELECT id, data, expires_at FROM sessions WHERE id = $1")
                .bind(session_id)
                .fetch_optional(&mut state.conn)
                .await
                .map_err(|e| Error::Database(format!("Failed to read session: {}", e)))?;

        let Some((id, data, expires_at)) = row else {
            return Ok(None);
        };

        let mut expires_at = from_unix(expires_at);
        if expires_at > now {
            let extended = sqlx::query(
                "UPDATE sessions SET expires_at = GREATEST(expires_at, $1) WHERE id = $2",
            )
            .bind(extend_to.timestamp())
            .bind(session_id)
            .execute(&mut state.conn)
            .await;

            match extended {
                Ok(_) => expires_at = expires_at.max(from_unix(extend_to.timestamp())),
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
        state.guard("upsert").await?;

        sqlx::query(
            r#"
            INSERT INTO sessions (id, data, expires_at) VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET
                data = EXCLUDED.data,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(session_id)
        .bind(data)
        .bind(expires_at.timestamp())
        .execute(&mut state.conn)
        .await
        .map_err(|e| Error::Database(format!("Failed to write session: {}", e)))?;

        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        let mut state = self.conn.state().await;
        state.guard("delete").await?;

        let result = sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(session_id)
            .execute(&mut state.conn)
            .await
            .map_err(|e| Error::Database(format!("Failed to delete session: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.conn.state().await;
        state.guard("sweep").await?;

        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now.timestamp())
            .execute(&mut state.conn)
            .await
            .map_err(|e| Error::Database(format!("Failed to sweep sessions: {}", e)))?;

        Ok(result.rows_affected())
    }

    async fn count(&self, now: DateTime<Utc>) -> Result<SessionCounts> {
        let mut state = self.conn.state().await;
        state.guard("count").await?;

        let (live, expired): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE expires_at > $1),
                COUNT(*) FILTER (WHERE expires_at <= $1)
            FROM sessions
            "#,
        )
        .bind(now.timestamp())
        .fetch_one(&mut state.conn)
        .await
        .map_err(|e| Error::Database(format!("Failed to count sessions: {}", e)))?;

        Ok(SessionCounts {
            live: live.max(0) as u64,
            expired: expired.max(0) as u64,
        })
    }
}
