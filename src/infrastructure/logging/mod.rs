//! Logging infrastructure
//!
//! Structured logging using tracing and tracing-subscriber:
//! - JSON or pretty console output on stderr
//! - Rolling JSON log files
//! - Credential redaction
//! - Audit trail

pub mod audit;
pub mod config;
pub mod logger;
pub mod secret_scrubbing;

pub use audit::{AuditEvent, AuditEventType, AuditLogger, AuditOutcome};
pub use config::{LogConfig, LogFormat, RotationPolicy};
pub use logger::LoggerImpl;
pub use secret_scrubbing::{redact_database_url, scrub_message};
