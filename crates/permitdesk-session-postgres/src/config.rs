//! Configuration for the shared PostgreSQL session connection

use std::time::Duration;

/// Configuration for the shared PostgreSQL connection
///
/// # Example
/// ```
/// use permitdesk_session_postgres::PostgresSessionStoreConfig;
/// use std::time::Duration;
///
/// let config = PostgresSessionStoreConfig::default()
///     .with_connect_timeout(Duration::from_secs(3))
///     .with_statement_timeout(Duration::from_secs(1));
/// ```
#[derive(Debug, Clone)]
pub struct PostgresSessionStoreConfig {
    /// Timeout for establishing the connection
    pub connect_timeout: Duration,

    /// Server-side `statement_timeout` applied to every statement on the connection
    pub statement_timeout: Duration,

    /// Reported in `pg_stat_activity`
    pub application_name: String,
}

impl Default for PostgresSessionStoreConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            statement_timeout: Duration::from_secs(5),
            application_name: "permitdesk".to_string(),
        }
    }
}

impl PostgresSessionStoreConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PostgresSessionStoreConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.statement_timeout, Duration::from_secs(5));
        assert_eq!(config.application_name, "permitdesk");
    }

    #[test]
    fn test_builder_pattern() {
        let config = PostgresSessionStoreConfig::new()
            .with_connect_timeout(Duration::from_secs(1))
            .with_application_name("permitdesk-cron");

        assert_eq!(config.connect_timeout, Duration::from_secs(1));
        assert_eq!(config.application_name, "permitdesk-cron");

        // Other values should remain at defaults
        assert_eq!(config.statement_timeout, Duration::from_secs(5));
    }
}
