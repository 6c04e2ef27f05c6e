//! Recorded tool errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const SUMMARY_MAX_CHARS: usize = 100;

/// An error raised by a tool during a session. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredError {
    /// `err_YYYYMMDD_HHMMSS_xxxxxx`
    pub id: String,
    /// Owning tenant. Filled in on load; ignored on save.
    #[serde(default)]
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub tool_name: String,
    /// Raw error payload, always a JSON document
    pub raw_error: serde_json::Value,
    /// First line of the error, truncated
    pub summary: String,
}

impl StoredError {
    /// Build a new record from raw error text.
    ///
    /// Text that is not valid JSON is wrapped as `{"message": <text>}`.
    pub fn new(session_id: impl Into<String>, tool_name: impl Into<String>, raw_error: &str) -> Self {
        let timestamp = Utc::now();
        Self {
            id: generate_error_id(timestamp),
            user_id: String::new(),
            timestamp,
            session_id: session_id.into(),
            tool_name: tool_name.into(),
            raw_error: normalize_raw_error(raw_error),
            summary: summarize(raw_error),
        }
    }
}

/// Filters for listing errors. Results are newest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorFilter {
    pub session_id: Option<String>,
    pub tool_name: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

pub fn generate_error_id(at: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("err_{}_{}", at.format("%Y%m%d_%H%M%S"), &suffix[..6])
}

pub fn normalize_raw_error(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({ "message": raw }))
}

pub fn summarize(raw: &str) -> String {
    let first_line = raw.lines().next().unwrap_or_default().trim();
    if first_line.chars().count() <= SUMMARY_MAX_CHARS {
        return first_line.to_string();
    }
    let truncated: String = first_line.chars().take(SUMMARY_MAX_CHARS - 3).collect();
    format!("{truncated}...")
}
