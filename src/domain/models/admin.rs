//! Cross-tenant views returned by the admin store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session row as seen by an operator, including its tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub user_id: String,
    pub agent_id: String,
    pub parent_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub total_cost_usd: f64,
    pub total_tokens: i64,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// One page of sessions plus the total across all pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPage {
    pub sessions: Vec<SessionSummary>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantSessionCount {
    pub user_id: String,
    pub session_count: i64,
}

/// System-wide aggregates over live rows of every tenant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub total_sessions: i64,
    pub total_messages: i64,
    pub total_tool_executions: i64,
    pub total_tenants: i64,
    pub total_cost_usd: f64,
    pub total_tokens: i64,
}

/// Rows removed by a purge sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
    pub sessions: u64,
    pub messages: u64,
    pub artifacts: u64,
}

impl PurgeReport {
    pub const fn total(&self) -> u64 {
        self.sessions + self.messages + self.artifacts
    }
}
