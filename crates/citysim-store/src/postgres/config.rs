//! PostgreSQL configuration

use std::time::Duration;
use thiserror::Error;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    Missing(String),

    #[error("Invalid configuration value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// PostgreSQL connection and behavior configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL
    pub database_url: String,
    /// Connection pool sizing and timeouts
    pub pool: PoolConfig,
    /// Apply embedded migrations on connect
    pub run_migrations: bool,
}

impl PostgresConfig {
    /// Load configuration from environment variables
    ///
    /// Requires DATABASE_URL. CITYSIM_DB_MAX_CONNECTIONS and
    /// CITYSIM_DB_RUN_MIGRATIONS override the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::Missing("DATABASE_URL".to_string()))?;
        let mut config = Self::from_database_url(&database_url)?;

        if let Ok(value) = std::env::var("CITYSIM_DB_MAX_CONNECTIONS") {
            config.pool.max_connections = value.parse().map_err(|_| ConfigError::Invalid {
                key: "CITYSIM_DB_MAX_CONNECTIONS".to_string(),
                reason: format!("'{}' is not a connection count", value),
            })?;
        }
        if let Ok(value) = std::env::var("CITYSIM_DB_RUN_MIGRATIONS") {
            config.run_migrations = value.parse().map_err(|_| ConfigError::Invalid {
                key: "CITYSIM_DB_RUN_MIGRATIONS".to_string(),
                reason: format!("'{}' is not true or false", value),
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Configuration with default pool settings for `database_url`
    pub fn from_database_url(database_url: &str) -> Result<Self, ConfigError> {
        let database_url = database_url.trim();
        if database_url.is_empty() {
            return Err(ConfigError::Invalid {
                key: "database_url".to_string(),
                reason: "cannot be empty".to_string(),
            });
        }

        Ok(Self {
            database_url: database_url.to_string(),
            pool: PoolConfig::default(),
            run_migrations: true,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !["postgres://", "postgresql://"]
            .iter()
            .any(|scheme| self.database_url.starts_with(scheme))
        {
            return Err(ConfigError::Invalid {
                key: "database_url".to_string(),
                reason: "expected a postgres:// or postgresql:// URL".to_string(),
            });
        }

        self.pool.validate()
    }
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_connections: u32,
    /// Upper bound; runs, cancellations and HTTP reads share the pool
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, reason: String| ConfigError::Invalid {
            key: format!("pool.{}", key),
            reason,
        };

        if self.max_connections == 0 {
            return Err(invalid("max_connections", "must be at least 1".to_string()));
        }
        if self.min_connections > self.max_connections {
            return Err(invalid(
                "min_connections",
                format!("{} exceeds max_connections {}", self.min_connections, self.max_connections),
            ));
        }
        if self.acquire_timeout.is_zero() {
            return Err(invalid("acquire_timeout", "must be non-zero".to_string()));
        }

        Ok(())
    }
}
