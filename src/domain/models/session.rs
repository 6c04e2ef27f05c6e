//! Domain models for agent sessions and everything recorded inside them.
//!
//! A session owns its messages, tool executions and memory snapshots. All of
//! them carry the owning tenant, but the tenant is always taken from the task's
//! tenant context when writing, never from these structs.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::DomainError;

/// Conversation session owned by one agent and one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier
    pub id: String,

    /// Agent that owns the session
    pub agent_id: String,

    /// Owning tenant. Filled in on load; ignored on save.
    #[serde(default)]
    pub user_id: String,

    /// Parent session when this session was delegated to a sub-agent
    pub parent_session_id: Option<String>,

    /// Arbitrary key/value context
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Accumulated cost of the session in USD
    #[serde(default)]
    pub total_cost_usd: f64,

    /// Accumulated token count of the session
    #[serde(default)]
    pub total_tokens: i64,

    /// Soft-delete marker
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            user_id: String::new(),
            parent_session_id: None,
            context: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
            total_cost_usd: 0.0,
            total_tokens: 0,
            deleted_at: None,
        }
    }

    pub fn with_parent(mut self, parent_session_id: impl Into<String>) -> Self {
        self.parent_session_id = Some(parent_session_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Add cost and tokens from one turn to the running totals.
    pub fn record_usage(&mut self, cost_usd: f64, tokens: i64) {
        self.total_cost_usd += cost_usd;
        self.total_tokens += tokens;
        self.updated_at = Utc::now();
    }
}

/// A session together with its live messages, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionWithMessages {
    pub session: Session,
    pub messages: Vec<Message>,
}

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
    System,
}

impl MessageRole {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
            Self::System => "system",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "tool" => Ok(Self::Tool),
            "system" => Ok(Self::System),
            other => Err(DomainError::Validation(format!("unknown message role: {other}"))),
        }
    }
}

/// A tool invocation requested by the assistant inside a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub input: serde_json::Value,
}

/// One message of a session. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Database-assigned id; zero until saved
    #[serde(default)]
    pub id: i64,
    pub session_id: String,
    /// Owning tenant. Filled in on load; ignored on save.
    #[serde(default)]
    pub user_id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub tool_use_id: Option<String>,
    pub tool_result: Option<serde_json::Value>,
    /// Agent that produced the message, when it was not the session owner
    pub agent_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub token_count: i32,
    #[serde(default)]
    pub cost_usd: f64,
}

impl Message {
    pub fn new(session_id: impl Into<String>, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: 0,
            session_id: session_id.into(),
            user_id: String::new(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_use_id: None,
            tool_result: None,
            agent_id: None,
            timestamp: Utc::now(),
            token_count: 0,
            cost_usd: 0.0,
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn with_tool_result(mut self, tool_use_id: impl Into<String>, result: serde_json::Value) -> Self {
        self.tool_use_id = Some(tool_use_id.into());
        self.tool_result = Some(result);
        self
    }

    pub fn with_usage(mut self, token_count: i32, cost_usd: f64) -> Self {
        self.token_count = token_count;
        self.cost_usd = cost_usd;
        self
    }
}

/// Append-only record of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    #[serde(default)]
    pub id: i64,
    pub session_id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    #[serde(default)]
    pub execution_time_ms: i64,
    pub timestamp: DateTime<Utc>,
}

impl ToolExecution {
    pub fn succeeded(
        session_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: serde_json::Value,
        result: serde_json::Value,
    ) -> Self {
        Self {
            id: 0,
            session_id: session_id.into(),
            tool_name: tool_name.into(),
            input,
            result: Some(result),
            error: None,
            execution_time_ms: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(
        session_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: serde_json::Value,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            session_id: session_id.into(),
            tool_name: tool_name.into(),
            input,
            result: None,
            error: Some(error.into()),
            execution_time_ms: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_duration_ms(mut self, execution_time_ms: i64) -> Self {
        self.execution_time_ms = execution_time_ms;
        self
    }
}

/// Append-only memory snapshot, e.g. a running summary of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    #[serde(default)]
    pub id: i64,
    pub session_id: String,
    pub snapshot_type: String,
    pub content: String,
    #[serde(default)]
    pub token_count: i32,
    pub created_at: DateTime<Utc>,
}

impl MemorySnapshot {
    pub fn new(
        session_id: impl Into<String>,
        snapshot_type: impl Into<String>,
        content: impl Into<String>,
        token_count: i32,
    ) -> Self {
        Self {
            id: 0,
            session_id: session_id.into(),
            snapshot_type: snapshot_type.into(),
            content: content.into(),
            token_count,
            created_at: Utc::now(),
        }
    }
}

/// Aggregates over the calling tenant's live sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_sessions: i64,
    pub total_messages: i64,
    pub total_tool_executions: i64,
    pub total_cost_usd: f64,
    pub total_tokens: i64,
}
