//! PostgreSQL implementation of the SessionRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use sqlx::types::Json;
use std::sync::{Arc, RwLock};
use tracing::instrument;

use super::admin_repository::PgAdminRepository;
use super::executor::TenantExecutor;
use crate::domain::errors::{DbResultExt, DomainError, DomainResult};
use crate::domain::models::{
    MemorySnapshot, Message, Session, SessionStats, SessionWithMessages, ToolCall, ToolExecution,
};
use crate::domain::ports::{AdminRepository, SessionCleanupHook, SessionRepository, DEFAULT_SEARCH_LIMIT};
use crate::infrastructure::logging::audit::{self, AuditEvent, AuditEventType, AuditLogger, AuditOutcome};

macro_rules! message_columns {
    () => {
        "m.id, m.session_id, m.user_id, m.role, m.content, m.tool_calls_json, m.tool_use_id, \
         m.tool_result_json, m.agent_id, m.timestamp, m.token_count, m.cost_usd"
    };
}

type HookList = Arc<RwLock<Vec<Arc<dyn SessionCleanupHook>>>>;

#[derive(Clone)]
pub struct PgSessionRepository {
    executor: TenantExecutor,
    hooks: HookList,
    admin: Option<Arc<PgAdminRepository>>,
    audit: Option<AuditLogger>,
}

impl PgSessionRepository {
    pub fn new(executor: TenantExecutor) -> Self {
        Self {
            executor,
            hooks: Arc::default(),
            admin: None,
            audit: None,
        }
    }

    /// Use a privileged probe to tell operators whether a load miss was a policy filter.
    #[must_use]
    pub fn with_admin_probe(mut self, admin: Arc<PgAdminRepository>) -> Self {
        self.admin = Some(admin);
        self
    }

    #[must_use]
    pub fn with_audit(mut self, audit: Option<AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    fn hook_snapshot(&self) -> Vec<Arc<dyn SessionCleanupHook>> {
        match self.hooks.read() {
            Ok(hooks) => hooks.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    async fn run_cleanup_hooks(&self, session_id: &str) {
        for hook in self.hook_snapshot() {
            if let Err(e) = hook.on_session_deleted(session_id).await {
                tracing::warn!(session_id, error = %e, "session cleanup hook failed");
            }
        }
    }

    async fn report_missing_session(&self, tenant: &str, session_id: &str) {
        let filtered_by_policy = match &self.admin {
            Some(admin) => admin.session_visible_to_any_tenant(session_id).await.ok(),
            None => None,
        };

        audit::record(
            self.audit.as_ref(),
            AuditEvent::new(AuditEventType::SessionNotFound, "load_session", tenant)
                .resource(session_id)
                .outcome(AuditOutcome::NoEffect)
                .metadata(json!({ "filtered_by_policy": filtered_by_policy })),
        )
        .await;
    }

    async fn report_zero_rows(&self, event_type: AuditEventType, operation: &str, tenant: &str, session_id: &str) {
        audit::record(
            self.audit.as_ref(),
            AuditEvent::new(event_type, operation, tenant)
                .resource(session_id)
                .outcome(AuditOutcome::NoEffect),
        )
        .await;
    }
}

/// Bump a live session's `updated_at`; `NotFound` when the tenant has no such live session.
async fn touch_session(conn: &mut sqlx::PgConnection, session_id: &str, tenant: &str) -> DomainResult<()> {
    let result = sqlx::query(
        "UPDATE sessions SET updated_at = NOW()
         WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL",
    )
    .bind(session_id)
    .bind(tenant)
    .execute(conn)
    .await
    .db_context("touch session")?;

    if result.rows_affected() == 0 {
        return Err(DomainError::not_found("session", session_id));
    }
    Ok(())
}

fn search_limit(limit: Option<i64>) -> i64 {
    limit.filter(|l| *l > 0).unwrap_or(DEFAULT_SEARCH_LIMIT)
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    #[instrument(skip(self, session), fields(session_id = %session.id))]
    async fn save_session(&self, session: &Session) -> DomainResult<()> {
        if session.id.trim().is_empty() || session.agent_id.trim().is_empty() {
            return Err(DomainError::Validation(
                "session id and agent id are required".to_string(),
            ));
        }

        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();

        sqlx::query(
            r#"INSERT INTO sessions (id, user_id, agent_id, parent_session_id, context_json,
               created_at, updated_at, total_cost_usd, total_tokens)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
               ON CONFLICT (id) DO UPDATE SET
                   agent_id = EXCLUDED.agent_id,
                   parent_session_id = EXCLUDED.parent_session_id,
                   context_json = EXCLUDED.context_json,
                   updated_at = EXCLUDED.updated_at,
                   total_cost_usd = EXCLUDED.total_cost_usd,
                   total_tokens = EXCLUDED.total_tokens"#,
        )
        .bind(&session.id)
        .bind(&tenant)
        .bind(&session.agent_id)
        .bind(&session.parent_session_id)
        .bind(Json(&session.context))
        .bind(session.created_at)
        .bind(session.updated_at)
        .bind(session.total_cost_usd)
        .bind(session.total_tokens)
        .execute(tx.conn())
        .await
        .db_context("save session")?;

        tx.commit().await
    }

    #[instrument(skip(self))]
    async fn load_session(&self, session_id: &str) -> DomainResult<Option<SessionWithMessages>> {
        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();

        let row: Option<SessionRow> = sqlx::query_as(
            r#"SELECT id, user_id, agent_id, parent_session_id, context_json, created_at,
               updated_at, total_cost_usd, total_tokens, deleted_at
               FROM sessions WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL"#,
        )
        .bind(session_id)
        .bind(&tenant)
        .fetch_optional(tx.conn())
        .await
        .db_context("load session")?;

        let Some(row) = row else {
            tx.commit().await?;
            self.report_missing_session(&tenant, session_id).await;
            return Ok(None);
        };

        let rows: Vec<MessageRow> = sqlx::query_as(concat!(
            "SELECT ",
            message_columns!(),
            " FROM messages m WHERE m.session_id = $1 AND m.user_id = $2 AND m.deleted_at IS NULL
              ORDER BY m.timestamp, m.id"
        ))
        .bind(session_id)
        .bind(&tenant)
        .fetch_all(tx.conn())
        .await
        .db_context("load session messages")?;

        tx.commit().await?;

        Ok(Some(SessionWithMessages {
            session: row.into(),
            messages: rows.into_iter().map(TryInto::try_into).collect::<DomainResult<_>>()?,
        }))
    }

    #[instrument(skip(self))]
    async fn list_sessions(&self) -> DomainResult<Vec<String>> {
        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();

        let ids = sqlx::query_scalar(
            "SELECT id FROM sessions WHERE user_id = $1 AND deleted_at IS NULL ORDER BY updated_at DESC",
        )
        .bind(&tenant)
        .fetch_all(tx.conn())
        .await
        .db_context("list sessions")?;

        tx.commit().await?;
        Ok(ids)
    }

    #[instrument(skip(self))]
    async fn load_agent_sessions(&self, agent_id: &str) -> DomainResult<Vec<String>> {
        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();

        let ids = sqlx::query_scalar(
            r#"SELECT id FROM sessions
               WHERE agent_id = $1 AND user_id = $2 AND deleted_at IS NULL
               ORDER BY updated_at DESC"#,
        )
        .bind(agent_id)
        .bind(&tenant)
        .fetch_all(tx.conn())
        .await
        .db_context("load agent sessions")?;

        tx.commit().await?;
        Ok(ids)
    }

    #[instrument(skip(self))]
    async fn delete_session(&self, session_id: &str) -> DomainResult<()> {
        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();

        let result = sqlx::query(
            "UPDATE sessions SET deleted_at = NOW() WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL",
        )
        .bind(session_id)
        .bind(&tenant)
        .execute(tx.conn())
        .await
        .db_context("delete session")?;

        tx.commit().await?;

        if result.rows_affected() == 0 {
            self.report_zero_rows(AuditEventType::ZeroRowDelete, "delete_session", &tenant, session_id)
                .await;
            return Ok(());
        }

        self.run_cleanup_hooks(session_id).await;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn restore_session(&self, session_id: &str) -> DomainResult<()> {
        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();

        let result = sqlx::query(
            "UPDATE sessions SET deleted_at = NULL WHERE id = $1 AND user_id = $2 AND deleted_at IS NOT NULL",
        )
        .bind(session_id)
        .bind(&tenant)
        .execute(tx.conn())
        .await
        .db_context("restore session")?;

        tx.commit().await?;

        if result.rows_affected() == 0 {
            self.report_zero_rows(AuditEventType::ZeroRowRestore, "restore_session", &tenant, session_id)
                .await;
        }
        Ok(())
    }

    #[instrument(skip(self, message), fields(session_id = %message.session_id, role = %message.role))]
    async fn save_message(&self, message: &Message) -> DomainResult<i64> {
        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();

        touch_session(tx.conn(), &message.session_id, &tenant).await?;

        let tool_calls = (!message.tool_calls.is_empty()).then(|| Json(&message.tool_calls));
        let id: i64 = sqlx::query_scalar(
            r#"INSERT INTO messages (session_id, user_id, role, content, tool_calls_json, tool_use_id,
               tool_result_json, agent_id, timestamp, token_count, cost_usd)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
               RETURNING id"#,
        )
        .bind(&message.session_id)
        .bind(&tenant)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(tool_calls)
        .bind(&message.tool_use_id)
        .bind(&message.tool_result)
        .bind(&message.agent_id)
        .bind(message.timestamp)
        .bind(message.token_count)
        .bind(message.cost_usd)
        .fetch_one(tx.conn())
        .await
        .db_context("save message")?;

        tx.commit().await?;
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn load_messages(&self, session_id: &str) -> DomainResult<Vec<Message>> {
        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();

        let rows: Vec<MessageRow> = sqlx::query_as(concat!(
            "SELECT ",
            message_columns!(),
            " FROM messages m JOIN sessions s ON s.id = m.session_id
              WHERE m.session_id = $1 AND m.user_id = $2
                AND m.deleted_at IS NULL AND s.deleted_at IS NULL
              ORDER BY m.timestamp, m.id"
        ))
        .bind(session_id)
        .bind(&tenant)
        .fetch_all(tx.conn())
        .await
        .db_context("load messages")?;

        tx.commit().await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    #[instrument(skip(self))]
    async fn load_messages_for_agent(&self, agent_id: &str) -> DomainResult<Vec<Message>> {
        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();

        let rows: Vec<MessageRow> = sqlx::query_as(concat!(
            "SELECT ",
            message_columns!(),
            " FROM messages m JOIN sessions s ON s.id = m.session_id
              WHERE s.agent_id = $1 AND s.user_id = $2
                AND s.deleted_at IS NULL AND m.deleted_at IS NULL
              ORDER BY m.timestamp, m.id"
        ))
        .bind(agent_id)
        .bind(&tenant)
        .fetch_all(tx.conn())
        .await
        .db_context("load messages for agent")?;

        tx.commit().await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    #[instrument(skip(self))]
    async fn load_messages_from_parent_session(&self, session_id: &str) -> DomainResult<Vec<Message>> {
        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();

        let parent: Option<Option<String>> = sqlx::query_scalar(
            "SELECT parent_session_id FROM sessions WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL",
        )
        .bind(session_id)
        .bind(&tenant)
        .fetch_optional(tx.conn())
        .await
        .db_context("find parent session")?;

        let Some(parent_id) = parent.flatten().filter(|p| !p.is_empty()) else {
            tx.commit().await?;
            return Ok(Vec::new());
        };

        let rows: Vec<MessageRow> = sqlx::query_as(concat!(
            "SELECT ",
            message_columns!(),
            " FROM messages m JOIN sessions s ON s.id = m.session_id
              WHERE m.session_id = $1 AND m.user_id = $2
                AND m.deleted_at IS NULL AND s.deleted_at IS NULL
              ORDER BY m.timestamp, m.id"
        ))
        .bind(&parent_id)
        .bind(&tenant)
        .fetch_all(tx.conn())
        .await
        .db_context("load parent session messages")?;

        tx.commit().await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    #[instrument(skip(self, query))]
    async fn search_messages(
        &self,
        query: &str,
        session_id: Option<&str>,
        limit: Option<i64>,
    ) -> DomainResult<Vec<Message>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();

        let rows: Vec<MessageRow> = sqlx::query_as(concat!(
            "SELECT ",
            message_columns!(),
            " FROM messages m JOIN sessions s ON s.id = m.session_id
              WHERE m.user_id = $1
                AND ($2::TEXT IS NULL OR m.session_id = $2)
                AND m.deleted_at IS NULL AND s.deleted_at IS NULL
                AND m.content_search @@ websearch_to_tsquery('english', $3)
              ORDER BY ts_rank_cd(m.content_search, websearch_to_tsquery('english', $3)) DESC, m.id
              LIMIT $4"
        ))
        .bind(&tenant)
        .bind(session_id)
        .bind(query)
        .bind(search_limit(limit))
        .fetch_all(tx.conn())
        .await
        .db_context("search messages")?;

        tx.commit().await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    #[instrument(skip(self, query))]
    async fn search_messages_by_agent(
        &self,
        agent_id: &str,
        query: &str,
        limit: Option<i64>,
    ) -> DomainResult<Vec<Message>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();

        let rows: Vec<MessageRow> = sqlx::query_as(concat!(
            "SELECT ",
            message_columns!(),
            " FROM messages m JOIN sessions s ON s.id = m.session_id
              WHERE s.agent_id = $1 AND s.user_id = $2
                AND s.deleted_at IS NULL AND m.deleted_at IS NULL
                AND m.content_search @@ websearch_to_tsquery('english', $3)
              ORDER BY ts_rank_cd(m.content_search, websearch_to_tsquery('english', $3)) DESC, m.id
              LIMIT $4"
        ))
        .bind(agent_id)
        .bind(&tenant)
        .bind(query)
        .bind(search_limit(limit))
        .fetch_all(tx.conn())
        .await
        .db_context("search messages by agent")?;

        tx.commit().await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    #[instrument(skip(self, execution), fields(session_id = %execution.session_id, tool = %execution.tool_name))]
    async fn save_tool_execution(&self, execution: &ToolExecution) -> DomainResult<i64> {
        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();

        touch_session(tx.conn(), &execution.session_id, &tenant).await?;

        let id: i64 = sqlx::query_scalar(
            r#"INSERT INTO tool_executions (session_id, user_id, tool_name, input_json, result_json,
               error, execution_time_ms, timestamp)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               RETURNING id"#,
        )
        .bind(&execution.session_id)
        .bind(&tenant)
        .bind(&execution.tool_name)
        .bind(&execution.input)
        .bind(&execution.result)
        .bind(&execution.error)
        .bind(execution.execution_time_ms)
        .bind(execution.timestamp)
        .fetch_one(tx.conn())
        .await
        .db_context("save tool execution")?;

        tx.commit().await?;
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn list_tool_executions(&self, session_id: &str) -> DomainResult<Vec<ToolExecution>> {
        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();

        let rows: Vec<ToolExecutionRow> = sqlx::query_as(
            r#"SELECT id, session_id, tool_name, input_json, result_json, error, execution_time_ms, timestamp
               FROM tool_executions WHERE session_id = $1 AND user_id = $2
               ORDER BY timestamp, id"#,
        )
        .bind(session_id)
        .bind(&tenant)
        .fetch_all(tx.conn())
        .await
        .db_context("list tool executions")?;

        tx.commit().await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self, snapshot), fields(session_id = %snapshot.session_id, snapshot_type = %snapshot.snapshot_type))]
    async fn save_memory_snapshot(&self, snapshot: &MemorySnapshot) -> DomainResult<i64> {
        if snapshot.snapshot_type.trim().is_empty() {
            return Err(DomainError::Validation("snapshot type is required".to_string()));
        }

        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();

        touch_session(tx.conn(), &snapshot.session_id, &tenant).await?;

        let id: i64 = sqlx::query_scalar(
            r#"INSERT INTO memory_snapshots (session_id, user_id, snapshot_type, content, token_count, created_at)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING id"#,
        )
        .bind(&snapshot.session_id)
        .bind(&tenant)
        .bind(&snapshot.snapshot_type)
        .bind(&snapshot.content)
        .bind(snapshot.token_count)
        .bind(snapshot.created_at)
        .fetch_one(tx.conn())
        .await
        .db_context("save memory snapshot")?;

        tx.commit().await?;
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn load_memory_snapshots(
        &self,
        session_id: &str,
        snapshot_type: &str,
        limit: Option<i64>,
    ) -> DomainResult<Vec<MemorySnapshot>> {
        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();

        // LIMIT NULL means no limit.
        let rows: Vec<MemorySnapshotRow> = sqlx::query_as(
            r#"SELECT id, session_id, snapshot_type, content, token_count, created_at
               FROM memory_snapshots
               WHERE session_id = $1 AND user_id = $2 AND snapshot_type = $3
               ORDER BY created_at, id
               LIMIT $4"#,
        )
        .bind(session_id)
        .bind(&tenant)
        .bind(snapshot_type)
        .bind(limit.filter(|l| *l > 0))
        .fetch_all(tx.conn())
        .await
        .db_context("load memory snapshots")?;

        tx.commit().await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn latest_memory_snapshot(
        &self,
        session_id: &str,
        snapshot_type: &str,
    ) -> DomainResult<Option<MemorySnapshot>> {
        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();

        let row: Option<MemorySnapshotRow> = sqlx::query_as(
            r#"SELECT id, session_id, snapshot_type, content, token_count, created_at
               FROM memory_snapshots
               WHERE session_id = $1 AND user_id = $2 AND snapshot_type = $3
               ORDER BY created_at DESC, id DESC
               LIMIT 1"#,
        )
        .bind(session_id)
        .bind(&tenant)
        .bind(snapshot_type)
        .fetch_optional(tx.conn())
        .await
        .db_context("load latest memory snapshot")?;

        tx.commit().await?;
        Ok(row.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn stats(&self) -> DomainResult<SessionStats> {
        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();

        let (total_sessions, total_cost_usd, total_tokens): (i64, f64, i64) = sqlx::query_as(
            r#"SELECT COUNT(*),
                      COALESCE(SUM(total_cost_usd), 0)::DOUBLE PRECISION,
                      COALESCE(SUM(total_tokens), 0)::BIGINT
               FROM sessions WHERE user_id = $1 AND deleted_at IS NULL"#,
        )
        .bind(&tenant)
        .fetch_one(tx.conn())
        .await
        .db_context("session stats")?;

        let total_messages: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM messages m JOIN sessions s ON s.id = m.session_id
               WHERE m.user_id = $1 AND m.deleted_at IS NULL AND s.deleted_at IS NULL"#,
        )
        .bind(&tenant)
        .fetch_one(tx.conn())
        .await
        .db_context("message stats")?;

        let total_tool_executions: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM tool_executions t JOIN sessions s ON s.id = t.session_id
               WHERE t.user_id = $1 AND s.deleted_at IS NULL"#,
        )
        .bind(&tenant)
        .fetch_one(tx.conn())
        .await
        .db_context("tool execution stats")?;

        tx.commit().await?;

        Ok(SessionStats {
            total_sessions,
            total_messages,
            total_tool_executions,
            total_cost_usd,
            total_tokens,
        })
    }

    fn register_cleanup_hook(&self, hook: Arc<dyn SessionCleanupHook>) {
        match self.hooks.write() {
            Ok(mut hooks) => hooks.push(hook),
            Err(poisoned) => poisoned.into_inner().push(hook),
        }
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    user_id: String,
    agent_id: String,
    parent_session_id: Option<String>,
    context_json: Json<Map<String, Value>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    total_cost_usd: f64,
    total_tokens: i64,
    deleted_at: Option<DateTime<Utc>>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Self {
            id: row.id,
            agent_id: row.agent_id,
            user_id: row.user_id,
            parent_session_id: row.parent_session_id,
            context: row.context_json.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
            total_cost_usd: row.total_cost_usd,
            total_tokens: row.total_tokens,
            deleted_at: row.deleted_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    session_id: String,
    user_id: String,
    role: String,
    content: String,
    tool_calls_json: Option<Json<Vec<ToolCall>>>,
    tool_use_id: Option<String>,
    tool_result_json: Option<Value>,
    agent_id: Option<String>,
    timestamp: DateTime<Utc>,
    token_count: i32,
    cost_usd: f64,
}

impl TryFrom<MessageRow> for Message {
    type Error = DomainError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            session_id: row.session_id,
            user_id: row.user_id,
            role: row.role.parse()?,
            content: row.content,
            tool_calls: row.tool_calls_json.map(|j| j.0).unwrap_or_default(),
            tool_use_id: row.tool_use_id,
            tool_result: row.tool_result_json,
            agent_id: row.agent_id,
            timestamp: row.timestamp,
            token_count: row.token_count,
            cost_usd: row.cost_usd,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ToolExecutionRow {
    id: i64,
    session_id: String,
    tool_name: String,
    input_json: Value,
    result_json: Option<Value>,
    error: Option<String>,
    execution_time_ms: i64,
    timestamp: DateTime<Utc>,
}

impl From<ToolExecutionRow> for ToolExecution {
    fn from(row: ToolExecutionRow) -> Self {
        Self {
            id: row.id,
            session_id: row.session_id,
            tool_name: row.tool_name,
            input: row.input_json,
            result: row.result_json,
            error: row.error,
            execution_time_ms: row.execution_time_ms,
            timestamp: row.timestamp,
        }
    }
}

#[derive(sqlx::FromRow)]
struct MemorySnapshotRow {
    id: i64,
    session_id: String,
    snapshot_type: String,
    content: String,
    token_count: i32,
    created_at: DateTime<Utc>,
}

impl From<MemorySnapshotRow> for MemorySnapshot {
    fn from(row: MemorySnapshotRow) -> Self {
        Self {
            id: row.id,
            session_id: row.session_id,
            snapshot_type: row.snapshot_type,
            content: row.content,
            token_count: row.token_count,
            created_at: row.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::MessageRole;

    #[test]
    fn test_search_limit_defaults() {
        assert_eq!(search_limit(None), DEFAULT_SEARCH_LIMIT);
        assert_eq!(search_limit(Some(0)), DEFAULT_SEARCH_LIMIT);
        assert_eq!(search_limit(Some(-5)), DEFAULT_SEARCH_LIMIT);
        assert_eq!(search_limit(Some(3)), 3);
    }

    #[test]
    fn test_message_row_conversion() {
        let row = MessageRow {
            id: 7,
            session_id: "s1".to_string(),
            user_id: "alice".to_string(),
            role: "assistant".to_string(),
            content: "hello".to_string(),
            tool_calls_json: Some(Json(vec![ToolCall {
                id: "call-1".to_string(),
                name: "search".to_string(),
                input: json!({"q": "rust"}),
            }])),
            tool_use_id: None,
            tool_result_json: None,
            agent_id: Some("helper".to_string()),
            timestamp: Utc::now(),
            token_count: 12,
            cost_usd: 0.01,
        };
        let message = Message::try_from(row).unwrap();
        assert_eq!(message.role, MessageRole::Assistant);
        assert_eq!(message.tool_calls.len(), 1);
        assert_eq!(message.user_id, "alice");
    }

    #[test]
    fn test_message_row_with_unknown_role_fails() {
        let row = MessageRow {
            id: 1,
            session_id: "s1".to_string(),
            user_id: "alice".to_string(),
            role: "narrator".to_string(),
            content: String::new(),
            tool_calls_json: None,
            tool_use_id: None,
            tool_result_json: None,
            agent_id: None,
            timestamp: Utc::now(),
            token_count: 0,
            cost_usd: 0.0,
        };
        assert!(Message::try_from(row).is_err());
    }

    struct CountingHook(std::sync::atomic::AtomicUsize);

    #[async_trait]
    impl SessionCleanupHook for CountingHook {
        async fn on_session_deleted(&self, _session_id: &str) -> anyhow::Result<()> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            anyhow::bail!("hook failures are logged, not propagated")
        }
    }

    #[tokio::test]
    async fn test_cleanup_hooks_run_even_when_one_fails() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://nobody@127.0.0.1:1/none")
            .unwrap();
        let repo = PgSessionRepository::new(TenantExecutor::new(pool));
        let hook = Arc::new(CountingHook(std::sync::atomic::AtomicUsize::new(0)));
        repo.register_cleanup_hook(hook.clone());
        repo.register_cleanup_hook(hook.clone());

        repo.run_cleanup_hooks("s1").await;
        assert_eq!(hook.0.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
