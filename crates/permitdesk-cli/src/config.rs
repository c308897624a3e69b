//! Configuration file loading for the maintenance CLI

use anyhow::{Context, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use permitdesk_core::SessionStoreConfig;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub store: SessionStoreConfig,

    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum DatabaseConfig {
    Sqlite { path: PathBuf },
    Postgres { url: String },
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig::Sqlite {
            path: PathBuf::from("~/.permitdesk/app.db"),
        }
    }
}

impl DatabaseConfig {
    /// Interpret a `--database-url` value.
    ///
    /// `postgres://` and `postgresql://` URLs select PostgreSQL; anything else
    /// is a SQLite path, with an optional `sqlite://` or `sqlite:` prefix.
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            return DatabaseConfig::Postgres {
                url: url.to_string(),
            };
        }

        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);
        DatabaseConfig::Sqlite {
            path: PathBuf::from(shellexpand::tilde(path).to_string()),
        }
    }
}

/// Load a TOML or YAML configuration file, chosen by extension
pub fn load(path: &Path) -> anyhow::Result<CliConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let config: CliConfig = match path.extension().and_then(|s| s.to_str()) {
        Some("toml") => toml::from_str(&contents)
            .with_context(|| format!("Invalid TOML in {}", path.display()))?,
        Some("yaml") | Some("yml") => serde_yaml::from_str(&contents)
            .with_context(|| format!("Invalid YAML in {}", path.display()))?,
        other => bail!(
            "Unsupported config file extension {:?} (expected toml, yaml or yml)",
            other
        ),
    };

    config.store.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use permitdesk_core::WriteConflictPolicy;
    use tempfile::TempDir;

    #[test]
    fn test_load_toml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sessions.toml");
        std::fs::write(
            &path,
            r#"
[store]
lifetime_secs = 3600
write_conflict_policy = "acknowledge"

[database]
backend = "postgres"
url = "postgres://localhost/permitdesk"
"#,
        )
        .unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.store.lifetime_secs, 3600);
        assert_eq!(config.store.operation_timeout_ms, 2_000);
        assert_eq!(
            config.store.write_conflict_policy,
            WriteConflictPolicy::Acknowledge
        );
        assert_eq!(
            config.database,
            DatabaseConfig::Postgres {
                url: "postgres://localhost/permitdesk".to_string()
            }
        );
    }

    #[test]
    fn test_load_yaml_with_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sessions.yaml");
        std::fs::write(
            &path,
            "database:\n  backend: sqlite\n  path: /var/lib/permitdesk/app.db\n",
        )
        .unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.store, SessionStoreConfig::default());
        assert_eq!(
            config.database,
            DatabaseConfig::Sqlite {
                path: PathBuf::from("/var/lib/permitdesk/app.db")
            }
        );
    }

    #[test]
    fn test_load_rejects_invalid_store_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sessions.toml");
        std::fs::write(&path, "[store]\nlifetime_secs = 0\n").unwrap();

        assert!(load(&path).is_err());
    }

    #[test]
    fn test_load_rejects_unknown_extension() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sessions.ini");
        std::fs::write(&path, "").unwrap();

        assert!(load(&path).is_err());
    }

    #[test]
    fn test_database_from_url() {
        assert_eq!(
            DatabaseConfig::from_url("postgresql://db/permitdesk"),
            DatabaseConfig::Postgres {
                url: "postgresql://db/permitdesk".to_string()
            }
        );
        assert_eq!(
            DatabaseConfig::from_url("sqlite:///srv/app.db"),
            DatabaseConfig::Sqlite {
                path: PathBuf::from("/srv/app.db")
            }
        );
        assert_eq!(
            DatabaseConfig::from_url("/srv/app.db"),
            DatabaseConfig::Sqlite {
                path: PathBuf::from("/srv/app.db")
            }
        );
    }
}
