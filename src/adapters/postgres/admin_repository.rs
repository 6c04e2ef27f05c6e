//! Cross-tenant administrative reads over a row-security-bypassing connection.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::instrument;

use super::executor::PrivilegedExecutor;
use crate::domain::errors::{DbResultExt, DomainError, DomainResult};
use crate::domain::models::{PurgeReport, SessionPage, SessionSummary, SystemStats, TenantSessionCount};
use crate::domain::ports::AdminRepository;
use crate::infrastructure::logging::audit::{self, AuditEvent, AuditEventType, AuditLogger};

const ADMIN_ACTOR: &str = "admin";
const MAX_PAGE_SIZE: i64 = 1000;
const DEFAULT_PAGE_SIZE: i64 = 50;

#[derive(Clone)]
pub struct PgAdminRepository {
    executor: PrivilegedExecutor,
    audit: Option<AuditLogger>,
}

impl PgAdminRepository {
    pub fn new(executor: PrivilegedExecutor) -> Self {
        Self { executor, audit: None }
    }

    #[must_use]
    pub fn with_audit(mut self, audit: Option<AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    async fn audit_access(&self, operation: &str) {
        audit::record(self.audit.as_ref(), AuditEvent::new(AuditEventType::AdminAccess, operation, ADMIN_ACTOR)).await;
    }
}

fn page_bounds(limit: i64, offset: i64) -> (i64, i64) {
    let limit = if limit <= 0 { DEFAULT_PAGE_SIZE } else { limit.min(MAX_PAGE_SIZE) };
    (limit, offset.max(0))
}

#[async_trait]
impl AdminRepository for PgAdminRepository {
    #[instrument(skip(self))]
    async fn list_all_sessions(&self, limit: i64, offset: i64) -> DomainResult<SessionPage> {
        self.audit_access("list_all_sessions").await;
        let (limit, offset) = page_bounds(limit, offset);

        let mut tx = self.executor.begin().await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(tx.conn())
            .await
            .db_context("count all sessions")?;

        let rows: Vec<SessionSummaryRow> = sqlx::query_as(
            r#"SELECT id, user_id, agent_id, parent_session_id, created_at, updated_at,
               total_cost_usd, total_tokens, deleted_at
               FROM sessions
               ORDER BY updated_at DESC, id
               LIMIT $1 OFFSET $2"#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(tx.conn())
        .await
        .db_context("list all sessions")?;

        tx.commit().await?;
        Ok(SessionPage {
            sessions: rows.into_iter().map(Into::into).collect(),
            total,
            limit,
            offset,
        })
    }

    #[instrument(skip(self))]
    async fn count_sessions_by_tenant(&self) -> DomainResult<Vec<TenantSessionCount>> {
        self.audit_access("count_sessions_by_tenant").await;

        let mut tx = self.executor.begin().await?;
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"SELECT user_id, COUNT(*) FROM sessions
               WHERE deleted_at IS NULL
               GROUP BY user_id
               ORDER BY COUNT(*) DESC, user_id"#,
        )
        .fetch_all(tx.conn())
        .await
        .db_context("count sessions by tenant")?;
        tx.commit().await?;

        Ok(rows
            .into_iter()
            .map(|(user_id, session_count)| TenantSessionCount { user_id, session_count })
            .collect())
    }

    #[instrument(skip(self))]
    async fn system_stats(&self) -> DomainResult<SystemStats> {
        self.audit_access("system_stats").await;

        let mut tx = self.executor.begin().await?;

        let (total_sessions, total_tenants, total_cost_usd, total_tokens): (i64, i64, f64, i64) = sqlx::query_as(
            r#"SELECT COUNT(*),
                      COUNT(DISTINCT user_id),
                      COALESCE(SUM(total_cost_usd), 0)::DOUBLE PRECISION,
                      COALESCE(SUM(total_tokens), 0)::BIGINT
               FROM sessions WHERE deleted_at IS NULL"#,
        )
        .fetch_one(tx.conn())
        .await
        .db_context("system session stats")?;

        let total_messages: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM messages m JOIN sessions s ON s.id = m.session_id
               WHERE m.deleted_at IS NULL AND s.deleted_at IS NULL"#,
        )
        .fetch_one(tx.conn())
        .await
        .db_context("system message stats")?;

        let total_tool_executions: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM tool_executions t JOIN sessions s ON s.id = t.session_id
               WHERE s.deleted_at IS NULL"#,
        )
        .fetch_one(tx.conn())
        .await
        .db_context("system tool execution stats")?;

        tx.commit().await?;
        Ok(SystemStats {
            total_sessions,
            total_messages,
            total_tool_executions,
            total_tenants,
            total_cost_usd,
            total_tokens,
        })
    }

    #[instrument(skip(self))]
    async fn session_visible_to_any_tenant(&self, session_id: &str) -> DomainResult<bool> {
        let mut tx = self.executor.begin().await?;
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM sessions WHERE id = $1 AND deleted_at IS NULL)")
                .bind(session_id)
                .fetch_one(tx.conn())
                .await
                .db_context("probe session")?;
        tx.commit().await?;
        Ok(exists)
    }

    #[instrument(skip(self), fields(grace_days = grace.num_days()))]
    async fn purge_soft_deleted(&self, grace: Duration) -> DomainResult<PurgeReport> {
        if grace < Duration::zero() {
            return Err(DomainError::Validation("purge grace period cannot be negative".to_string()));
        }
        let cutoff = Utc::now() - grace;

        let mut tx = self.executor.begin().await?;

        // Messages first so cascaded ones are counted too.
        let messages = sqlx::query(
            r#"DELETE FROM messages
               WHERE deleted_at < $1
                  OR session_id IN (SELECT id FROM sessions WHERE deleted_at < $1)"#,
        )
        .bind(cutoff)
        .execute(tx.conn())
        .await
        .db_context("purge messages")?
        .rows_affected();

        let sessions = sqlx::query("DELETE FROM sessions WHERE deleted_at < $1")
            .bind(cutoff)
            .execute(tx.conn())
            .await
            .db_context("purge sessions")?
            .rows_affected();

        let artifacts = sqlx::query("DELETE FROM artifacts WHERE deleted_at < $1")
            .bind(cutoff)
            .execute(tx.conn())
            .await
            .db_context("purge artifacts")?
            .rows_affected();

        tx.commit().await?;

        let report = PurgeReport {
            sessions,
            messages,
            artifacts,
        };
        audit::record(
            self.audit.as_ref(),
            AuditEvent::new(AuditEventType::SoftDeletePurge, "purge_soft_deleted", ADMIN_ACTOR).metadata(json!({
                "cutoff": cutoff,
                "sessions": report.sessions,
                "messages": report.messages,
                "artifacts": report.artifacts,
            })),
        )
        .await;
        Ok(report)
    }
}

#[derive(sqlx::FromRow)]
struct SessionSummaryRow {
    id: String,
    user_id: String,
    agent_id: String,
    parent_session_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    total_cost_usd: f64,
    total_tokens: i64,
    deleted_at: Option<DateTime<Utc>>,
}

impl From<SessionSummaryRow> for SessionSummary {
    fn from(row: SessionSummaryRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            agent_id: row.agent_id,
            parent_session_id: row.parent_session_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            total_cost_usd: row.total_cost_usd,
            total_tokens: row.total_tokens,
            deleted_at: row.deleted_at,
        }
    }
}
