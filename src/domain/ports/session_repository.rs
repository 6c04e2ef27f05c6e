/// Session repository port (trait) for dependency injection.
///
/// Every method is scoped to the tenant bound with
/// [`crate::domain::tenant::scope`] and fails with `MissingTenant` outside one.
use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    MemorySnapshot, Message, Session, SessionStats, SessionWithMessages, ToolExecution,
};

/// Default cap for full-text message search.
pub const DEFAULT_SEARCH_LIMIT: i64 = 20;

/// Callback run after a session has been soft-deleted.
///
/// Hooks run after the deleting transaction committed. A failing hook is
/// logged and does not undo the deletion or stop the remaining hooks.
#[async_trait]
pub trait SessionCleanupHook: Send + Sync {
    async fn on_session_deleted(&self, session_id: &str) -> anyhow::Result<()>;
}

/// Repository trait for session, message, tool-execution and snapshot persistence
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Upserts a session keyed by id.
    ///
    /// The owning tenant always comes from the tenant context, never from
    /// `session.user_id`.
    async fn save_session(&self, session: &Session) -> DomainResult<()>;

    /// Loads a live session with its live messages, oldest first.
    ///
    /// # Returns
    /// - `None` when the session does not exist, was soft-deleted, or belongs
    ///   to another tenant. These cases are indistinguishable.
    async fn load_session(&self, session_id: &str) -> DomainResult<Option<SessionWithMessages>>;

    /// Ids of live sessions, most recently updated first.
    async fn list_sessions(&self) -> DomainResult<Vec<String>>;

    /// Ids of live sessions owned by one agent, most recently updated first.
    async fn load_agent_sessions(&self, agent_id: &str) -> DomainResult<Vec<String>>;

    /// Soft-deletes a session and runs cleanup hooks.
    ///
    /// Affecting zero rows is not an error.
    async fn delete_session(&self, session_id: &str) -> DomainResult<()>;

    /// Clears a session's deletion marker. Affecting zero rows is not an error.
    async fn restore_session(&self, session_id: &str) -> DomainResult<()>;

    /// Appends a message and returns its id.
    ///
    /// # Errors
    /// - `NotFound` when the session is not a live session of the tenant
    async fn save_message(&self, message: &Message) -> DomainResult<i64>;

    async fn load_messages(&self, session_id: &str) -> DomainResult<Vec<Message>>;

    /// Messages of the tenant's live sessions that belong to `agent_id`, oldest first.
    async fn load_messages_for_agent(&self, agent_id: &str) -> DomainResult<Vec<Message>>;

    /// Messages of the parent session, or an empty list when there is none.
    async fn load_messages_from_parent_session(&self, session_id: &str) -> DomainResult<Vec<Message>>;

    /// Full-text search over message content, most relevant first.
    async fn search_messages(
        &self,
        query: &str,
        session_id: Option<&str>,
        limit: Option<i64>,
    ) -> DomainResult<Vec<Message>>;

    async fn search_messages_by_agent(
        &self,
        agent_id: &str,
        query: &str,
        limit: Option<i64>,
    ) -> DomainResult<Vec<Message>>;

    async fn save_tool_execution(&self, execution: &ToolExecution) -> DomainResult<i64>;

    async fn list_tool_executions(&self, session_id: &str) -> DomainResult<Vec<ToolExecution>>;

    async fn save_memory_snapshot(&self, snapshot: &MemorySnapshot) -> DomainResult<i64>;

    /// Snapshots of one type, oldest first, optionally capped.
    async fn load_memory_snapshots(
        &self,
        session_id: &str,
        snapshot_type: &str,
        limit: Option<i64>,
    ) -> DomainResult<Vec<MemorySnapshot>>;

    async fn latest_memory_snapshot(
        &self,
        session_id: &str,
        snapshot_type: &str,
    ) -> DomainResult<Option<MemorySnapshot>>;

    /// Aggregates over the tenant's live sessions only.
    async fn stats(&self) -> DomainResult<SessionStats>;

    fn register_cleanup_hook(&self, hook: Arc<dyn SessionCleanupHook>);
}
