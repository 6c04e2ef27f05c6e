use serde::{Deserialize, Serialize};

/// Main configuration structure for agentstore
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Soft-delete retention configuration
    #[serde(default)]
    pub retention: RetentionConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Connection URL for the tenant-scoped application role
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Connection URL for a role with BYPASSRLS. Without it the admin store is unavailable.
    #[serde(default)]
    pub admin_url: Option<String>,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of idle connections kept open
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Seconds to wait for a pooled connection
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// Apply pending migrations on connect
    #[serde(default = "default_auto_migrate")]
    pub auto_migrate: bool,
}

fn default_database_url() -> String {
    "postgres://localhost:5432/agentstore".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_min_connections() -> u32 {
    1
}

const fn default_acquire_timeout_secs() -> u64 {
    5
}

const fn default_auto_migrate() -> bool {
    true
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            admin_url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            auto_migrate: default_auto_migrate(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling JSON log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Log file rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,

    /// JSON-lines file receiving audit events
    #[serde(default)]
    pub audit_log_path: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
            audit_log_path: None,
        }
    }
}

/// Retention of soft-deleted rows before the purge sweep removes them
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetentionConfig {
    #[serde(default = "default_soft_delete_grace_days")]
    pub soft_delete_grace_days: u32,
}

const fn default_soft_delete_grace_days() -> u32 {
    30
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            soft_delete_grace_days: default_soft_delete_grace_days(),
        }
    }
}
