use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Database URL cannot be empty")]
    EmptyDatabaseUrl,

    #[error("Invalid database URL scheme in {0}. Must start with postgres:// or postgresql://")]
    InvalidDatabaseScheme(&'static str),

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid min_connections: {min}. Cannot exceed max_connections ({max})")]
    InvalidMinConnections { min: u32, max: u32 },

    #[error("Invalid acquire_timeout_secs: {0}. Must be at least 1")]
    InvalidAcquireTimeout(u64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Invalid soft_delete_grace_days: {0}. Must be at least 1")]
    InvalidGraceDays(u32),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Environment variable prefix; `__` separates nested keys.
    pub const ENV_PREFIX: &'static str = "AGENTSTORE_";

    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. agentstore.yaml
    /// 3. agentstore.local.yaml (optional local overrides)
    /// 4. Environment variables (AGENTSTORE_* prefix, e.g. AGENTSTORE_DATABASE__URL)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file("agentstore.yaml"))
            .merge(Yaml::file("agentstore.local.yaml"))
            .merge(Env::prefixed(Self::ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honouring environment overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed(Self::ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let db = &config.database;
        if db.url.trim().is_empty() {
            return Err(ConfigError::EmptyDatabaseUrl);
        }
        if !has_postgres_scheme(&db.url) {
            return Err(ConfigError::InvalidDatabaseScheme("database.url"));
        }
        if let Some(admin_url) = &db.admin_url {
            if !has_postgres_scheme(admin_url) {
                return Err(ConfigError::InvalidDatabaseScheme("database.admin_url"));
            }
        }
        if db.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(db.max_connections));
        }
        if db.min_connections > db.max_connections {
            return Err(ConfigError::InvalidMinConnections {
                min: db.min_connections,
                max: db.max_connections,
            });
        }
        if db.acquire_timeout_secs == 0 {
            return Err(ConfigError::InvalidAcquireTimeout(db.acquire_timeout_secs));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        if config.retention.soft_delete_grace_days == 0 {
            return Err(ConfigError::InvalidGraceDays(config.retention.soft_delete_grace_days));
        }

        Ok(())
    }
}

fn has_postgres_scheme(url: &str) -> bool {
    url.starts_with("postgres://") || url.starts_with("postgresql://")
}
