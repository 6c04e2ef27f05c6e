//! Audit logging for security-relevant storage events
//!
//! Every event is emitted on the `audit` tracing target. When an
//! [`AuditLogger`] is configured, events are also appended to a JSON-lines
//! file so operators can spot cross-tenant probing after the fact.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::warn;

use super::secret_scrubbing::scrub_message;

/// Audit logger writing JSON lines to an append-only file
#[derive(Clone)]
pub struct AuditLogger {
    log_file: Arc<Mutex<File>>,
}

/// Audit event types for categorizing storage events
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    SessionNotFound,
    ZeroRowDelete,
    ZeroRowRestore,
    PolicyViolation,
    AdminAccess,
    MigrationApplied,
    MigrationRolledBack,
    SoftDeletePurge,
}

/// Outcome of an audited operation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    /// The operation ran but matched no rows
    NoEffect,
}

/// Complete audit event record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub operation: String,
    /// Tenant id, or `admin` / `migrator` for privileged paths
    pub actor: String,
    pub resource_id: Option<String>,
    pub outcome: AuditOutcome,
    pub metadata: Option<Value>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, operation: &str, actor: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            operation: operation.to_string(),
            actor: actor.to_string(),
            resource_id: None,
            outcome: AuditOutcome::Success,
            metadata: None,
        }
    }

    #[must_use]
    pub fn resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    #[must_use]
    pub const fn outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    #[must_use]
    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

impl AuditLogger {
    /// Create a new audit logger writing to the specified file
    ///
    /// Creates parent directories if they don't exist and opens the file in
    /// append mode to preserve the existing trail.
    pub async fn new(log_path: impl AsRef<Path>) -> Result<Self> {
        let log_path = log_path.as_ref();

        if let Some(parent) = log_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("failed to create audit log directory")?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .context("failed to open audit log file")?;

        Ok(Self {
            log_file: Arc::new(Mutex::new(file)),
        })
    }

    /// Append an event as one JSON line
    pub async fn log_event(&self, event: &AuditEvent) -> Result<()> {
        let json = serde_json::to_string(event).context("failed to serialize audit event")?;
        let line = scrub_message(&json);

        let mut file = self
            .log_file
            .lock()
            .map_err(|e| anyhow::anyhow!("audit log mutex poisoned: {e}"))?;

        writeln!(file, "{line}").context("failed to write audit event")?;
        file.flush().context("failed to flush audit log")?;
        Ok(())
    }
}

/// Emit an audit event on the `audit` target and, when configured, to the audit file.
///
/// A failing file write is logged and never surfaced to the caller: the
/// audited operation has already happened.
pub async fn record(logger: Option<&AuditLogger>, event: AuditEvent) {
    tracing::warn!(
        target: "audit",
        event_type = ?event.event_type,
        operation = %event.operation,
        actor = %event.actor,
        resource_id = ?event.resource_id,
        outcome = ?event.outcome,
        metadata = ?event.metadata,
        "audit event"
    );

    if let Some(logger) = logger {
        if let Err(e) = logger.log_event(&event).await {
            warn!(error = %e, operation = %event.operation, "failed to write audit event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read_events(path: &Path) -> Vec<AuditEvent> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_audit_logger_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("logs/audit/events.log");

        let _logger = AuditLogger::new(&log_path).await.unwrap();
        assert!(log_path.exists());
    }

    #[tokio::test]
    async fn test_record_writes_json_line() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("audit.log");
        let logger = AuditLogger::new(&log_path).await.unwrap();

        let event = AuditEvent::new(AuditEventType::ZeroRowDelete, "delete_session", "tenant-b")
            .resource("sess-1")
            .outcome(AuditOutcome::NoEffect);
        record(Some(&logger), event).await;

        let events = read_events(&log_path);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, AuditEventType::ZeroRowDelete);
        assert_eq!(events[0].actor, "tenant-b");
        assert_eq!(events[0].resource_id.as_deref(), Some("sess-1"));
        assert_eq!(events[0].outcome, AuditOutcome::NoEffect);
    }

    #[tokio::test]
    async fn test_metadata_is_scrubbed() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("audit.log");
        let logger = AuditLogger::new(&log_path).await.unwrap();

        let event = AuditEvent::new(AuditEventType::AdminAccess, "system_stats", "admin")
            .metadata(serde_json::json!({"url": "postgres://root:pw123@db/app"}));
        logger.log_event(&event).await.unwrap();

        let contents = std::fs::read_to_string(&log_path).unwrap();
        assert!(!contents.contains("pw123"));
    }

    #[tokio::test]
    async fn test_record_without_file_is_silent() {
        let event = AuditEvent::new(AuditEventType::SessionNotFound, "load_session", "tenant-a");
        record(None, event).await;
    }

    #[tokio::test]
    async fn test_concurrent_writes_append() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("audit.log");
        let logger = AuditLogger::new(&log_path).await.unwrap();

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let logger = logger.clone();
                tokio::spawn(async move {
                    let event = AuditEvent::new(AuditEventType::ZeroRowRestore, "restore_session", "t")
                        .resource(format!("s-{i}"));
                    logger.log_event(&event).await.unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(read_events(&log_path).len(), 10);
    }
}
