//! PermitDesk session store maintenance CLI
//!
//! Out-of-band operations for the session table: the one-time schema
//! bootstrap run at deployment, and the expiry sweep run from cron.

mod config;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use permitdesk_core::{SessionBackend, SessionHandler, SessionLifecycleAdapter};
use permitdesk_session_postgres::{PostgresSessionStore, PostgresSessionStoreConfig};
use permitdesk_session_sqlite::{SqliteConnectionConfig, SqliteSessionStore};

use crate::config::{CliConfig, DatabaseConfig};

#[derive(Parser)]
#[command(name = "permitdesk-sessions")]
#[command(about = "PermitDesk session store maintenance", long_about = None)]
struct Cli {
    /// TOML or YAML configuration file
    #[arg(long, short, env = "PERMITDESK_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides the configured database (postgres:// URL or SQLite path)
    #[arg(long, env = "PERMITDESK_DATABASE_URL")]
    database_url: Option<String>,

    #[arg(long, default_value = "info", env = "PERMITDESK_LOG_LEVEL")]
    log_level: String,

    /// Log every SQL statement
    #[arg(long, default_value = "false")]
    log_sql: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the session table (run once per deployment)
    Migrate,
    /// Delete expired sessions
    Gc {
        /// Lifetime hint forwarded to the handler; rows carry their own expiry
        #[arg(long, default_value = "1440")]
        max_lifetime_secs: u64,
    },
    /// Show live and expired session counts
    Stats,
}

fn init_tracing(log_level: &str, log_sql: bool) -> anyhow::Result<()> {
    let mut filter = EnvFilter::new(log_level);

    // sqlx logs every statement at INFO; keep it quiet unless asked
    if !log_sql {
        match "sqlx=warn".parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("Failed to set sqlx log filter: {}", e),
        }
    }

    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

async fn open_backend(database: &DatabaseConfig) -> anyhow::Result<Arc<dyn SessionBackend>> {
    let backend: Arc<dyn SessionBackend> = match database {
        DatabaseConfig::Sqlite { path } => {
            let path = shellexpand::tilde(&path.to_string_lossy()).to_string();
            info!("Using SQLite session store at {}", path);
            Arc::new(
                SqliteSessionStore::connect(&SqliteConnectionConfig::new(path))
                    .await
                    .context("Failed to open SQLite database")?,
            )
        }
        DatabaseConfig::Postgres { url } => {
            info!("Using PostgreSQL session store");
            let config = PostgresSessionStoreConfig::default()
                .with_application_name("permitdesk-sessions");
            Arc::new(
                PostgresSessionStore::connect(url, &config)
                    .await
                    .context("Failed to connect to PostgreSQL")?,
            )
        }
    };
    Ok(backend)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_sql)?;

    let mut config = match &cli.config {
        Some(path) => {
            let path = PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).to_string());
            config::load(&path)?
        }
        None => CliConfig::default(),
    };
    if let Some(url) = &cli.database_url {
        config.database = DatabaseConfig::from_url(url);
    }

    let backend = open_backend(&config.database).await?;
    let adapter = SessionLifecycleAdapter::new(backend, &config.store)?;

    match cli.command {
        Commands::Migrate => {
            adapter
                .bootstrap()
                .await
                .context("Session schema bootstrap failed")?;
            println!("Session schema is up to date");
        }
        Commands::Gc { max_lifetime_secs } => match adapter.gc(max_lifetime_secs).await {
            Some(removed) => println!("Removed {} expired sessions", removed),
            None => bail!("Session garbage collection failed, see log for details"),
        },
        Commands::Stats => {
            let counts = adapter.stats().await.context("Failed to count sessions")?;
            println!("live sessions:    {}", counts.live);
            println!("expired sessions: {}", counts.expired);
        }
    }

    Ok(())
}
