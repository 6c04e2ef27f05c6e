use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Postgres, QueryBuilder};
use tracing::instrument;

use super::executor::TenantExecutor;
use crate::domain::errors::{DbResultExt, DomainError, DomainResult};
use crate::domain::models::{ErrorFilter, StoredError};
use crate::domain::ports::ErrorRepository;

#[derive(Clone)]
pub struct PgErrorRepository {
    executor: TenantExecutor,
}

impl PgErrorRepository {
    pub fn new(executor: TenantExecutor) -> Self {
        Self { executor }
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &ErrorFilter) {
    if let Some(session_id) = filter.session_id.as_ref().filter(|s| !s.is_empty()) {
        qb.push(" AND session_id = ").push_bind(session_id.clone());
    }
    if let Some(tool_name) = filter.tool_name.as_ref().filter(|t| !t.is_empty()) {
        qb.push(" AND tool_name = ").push_bind(tool_name.clone());
    }
    if let Some(start) = filter.start {
        qb.push(" AND timestamp >= ").push_bind(start);
    }
    if let Some(end) = filter.end {
        qb.push(" AND timestamp <= ").push_bind(end);
    }

    qb.push(" ORDER BY timestamp DESC, id DESC");

    if let Some(limit) = filter.limit.filter(|l| *l > 0) {
        qb.push(" LIMIT ").push_bind(limit);
    }
}

#[async_trait]
impl ErrorRepository for PgErrorRepository {
    #[instrument(skip(self, raw_error))]
    async fn store(&self, session_id: &str, tool_name: &str, raw_error: &str) -> DomainResult<StoredError> {
        if tool_name.trim().is_empty() {
            return Err(DomainError::Validation("tool name is required".to_string()));
        }

        let mut tx = self.executor.begin().await?;
        let mut record = StoredError::new(session_id, tool_name, raw_error);
        record.user_id = tx.tenant().as_str().to_string();

        sqlx::query(
            r#"INSERT INTO agent_errors (id, user_id, timestamp, session_id, tool_name, raw_error, summary)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(record.timestamp)
        .bind(&record.session_id)
        .bind(&record.tool_name)
        .bind(&record.raw_error)
        .bind(&record.summary)
        .execute(tx.conn())
        .await
        .db_context("store error")?;

        tx.commit().await?;
        tracing::debug!(error_id = %record.id, "stored tool error");
        Ok(record)
    }

    #[instrument(skip(self))]
    async fn get(&self, error_id: &str) -> DomainResult<Option<StoredError>> {
        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();

        let row: Option<ErrorRow> = sqlx::query_as(
            r#"SELECT id, user_id, timestamp, session_id, tool_name, raw_error, summary
               FROM agent_errors WHERE id = $1 AND user_id = $2"#,
        )
        .bind(error_id)
        .bind(&tenant)
        .fetch_optional(tx.conn())
        .await
        .db_context("get error")?;

        tx.commit().await?;
        Ok(row.map(Into::into))
    }

    #[instrument(skip(self, filter))]
    async fn list(&self, filter: &ErrorFilter) -> DomainResult<Vec<StoredError>> {
        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();

        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT id, user_id, timestamp, session_id, tool_name, raw_error, summary FROM agent_errors WHERE user_id = ",
        );
        qb.push_bind(tenant);
        push_filter(&mut qb, filter);

        let rows: Vec<ErrorRow> = qb
            .build_query_as()
            .fetch_all(tx.conn())
            .await
            .db_context("list errors")?;

        tx.commit().await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[derive(sqlx::FromRow)]
struct ErrorRow {
    id: String,
    user_id: String,
    timestamp: DateTime<Utc>,
    session_id: String,
    tool_name: String,
    raw_error: Value,
    summary: String,
}

impl From<ErrorRow> for StoredError {
    fn from(row: ErrorRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            timestamp: row.timestamp,
            session_id: row.session_id,
            tool_name: row.tool_name,
            raw_error: row.raw_error,
            summary: row.summary,
        }
    }
}
