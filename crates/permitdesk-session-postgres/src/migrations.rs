//! Versioned schema for the PostgreSQL session store
//!
//! Applied by `permitdesk-sessions migrate` at deployment (or by
//! `SessionLifecycleAdapter::bootstrap` on startup), never per request.
//! Each step runs in its own transaction together with its bookkeeping row,
//! so a failed step leaves the schema at the previous version.

use permitdesk_core::{Error, Result};
use sqlx::Connection;
use sqlx::postgres::PgConnection;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
pub struct SchemaStep {
    /// Consecutive, starting at 1
    pub version: i32,
    pub name: &'static str,
    pub sql: &'static str,
}

pub const SCHEMA_STEPS: &[SchemaStep] = &[
    SchemaStep {
        version: 1,
        name: "sessions table",
        sql: r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                data BYTEA NOT NULL,
                expires_at BIGINT NOT NULL
            )
        "#,
    },
    SchemaStep {
        version: 2,
        name: "sessions expiry index",
        sql: r#"
            CREATE INDEX IF NOT EXISTS idx_sessions_expires_at
            ON sessions(expires_at)
        "#,
    },
];

const VERSION_TABLE_DDL: &str = r#"
    CREATE TABLE IF NOT EXISTS session_schema_migrations (
        version INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
"#;

/// Bring the schema up to the latest step. Returns the number of steps applied.
pub async fn run_migrations(conn: &mut PgConnection) -> Result<usize> {
    sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(VERSION_TABLE_DDL))
        .await
        .map_err(|e| Error::Database(format!("Cannot create migration table: {}", e)))?;

    let current = get_current_version(conn).await?.unwrap_or(0);
    debug!(current, latest = latest_version(), "Session schema version");

    let mut applied = 0;
    for step in SCHEMA_STEPS.iter().filter(|s| s.version > current) {
        info!("Migrating session schema to v{} ({})", step.version, step.name);
        apply_step(conn, step).await?;
        applied += 1;
    }

    Ok(applied)
}

async fn apply_step(conn: &mut PgConnection, step: &SchemaStep) -> Result<()> {
    let step_error =
        |e: sqlx::Error| Error::Database(format!("Session schema v{} failed: {}", step.version, e));

    let mut tx = conn.begin().await.map_err(step_error)?;

    sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(step.sql))
        .await
        .map_err(step_error)?;

    sqlx::query("INSERT INTO session_schema_migrations (version, name) VALUES ($1, $2)")
        .bind(step.version)
        .bind(step.name)
        .execute(&mut *tx)
        .await
        .map_err(step_error)?;

    tx.commit().await.map_err(step_error)
}

/// Highest applied step, `None` if the migration table does not exist yet
pub async fn get_current_version(conn: &mut PgConnection) -> Result<Option<i32>> {
    let tracked: Option<String> =
        sqlx::query_scalar("SELECT to_regclass('session_schema_migrations')::text")
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| Error::Database(format!("Cannot look up migration table: {}", e)))?;

    if tracked.is_none() {
        return Ok(None);
    }

    sqlx::query_scalar("SELECT MAX(version) FROM session_schema_migrations")
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| Error::Database(format!("Cannot read session schema version: {}", e)))
}

pub fn latest_version() -> i32 {
    SCHEMA_STEPS.last().map(|s| s.version).unwrap_or(0)
}
