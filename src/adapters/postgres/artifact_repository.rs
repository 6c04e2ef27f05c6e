use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder};
use tracing::instrument;

use super::executor::TenantExecutor;
use crate::domain::errors::{DbResultExt, DomainError, DomainResult};
use crate::domain::models::{Artifact, ArtifactFilter, ArtifactStats};
use crate::domain::ports::{ArtifactRepository, DEFAULT_SEARCH_LIMIT};
use crate::infrastructure::logging::audit::{self, AuditEvent, AuditEventType, AuditLogger, AuditOutcome};

const ARTIFACT_COLUMNS: &str = "id, user_id, session_id, name, path, source, source_agent_id, purpose, \
     content_type, size_bytes, checksum, created_at, updated_at, last_accessed_at, access_count, \
     tags, metadata_json, deleted_at";

#[derive(Clone)]
pub struct PgArtifactRepository {
    executor: TenantExecutor,
    audit: Option<AuditLogger>,
}

impl PgArtifactRepository {
    pub fn new(executor: TenantExecutor) -> Self {
        Self { executor, audit: None }
    }

    #[must_use]
    pub fn with_audit(mut self, audit: Option<AuditLogger>) -> Self {
        self.audit = audit;
        self
    }
}

/// Appends the filter predicates, ordering and paging to a query already
/// restricted to one tenant.
fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &ArtifactFilter) {
    if !filter.include_deleted {
        qb.push(" AND deleted_at IS NULL");
    }
    if let Some(session_id) = filter.session_id.as_ref().filter(|s| !s.is_empty()) {
        qb.push(" AND session_id = ").push_bind(session_id.clone());
    }
    if let Some(source) = filter.source {
        qb.push(" AND source = ").push_bind(source.as_str());
    }
    if let Some(content_type) = filter.content_type.as_ref().filter(|c| !c.is_empty()) {
        qb.push(" AND content_type = ").push_bind(content_type.clone());
    }
    for tag in &filter.tags {
        qb.push(" AND tags @> ").push_bind(Json(vec![tag.clone()]));
    }
    if let Some(min) = filter.min_size.filter(|m| *m > 0) {
        qb.push(" AND size_bytes >= ").push_bind(min);
    }
    if let Some(max) = filter.max_size.filter(|m| *m > 0) {
        qb.push(" AND size_bytes <= ").push_bind(max);
    }
    if let Some(after) = filter.created_after {
        qb.push(" AND created_at >= ").push_bind(after);
    }
    if let Some(before) = filter.created_before {
        qb.push(" AND created_at <= ").push_bind(before);
    }

    qb.push(" ORDER BY created_at DESC, id");

    if let Some(limit) = filter.limit.filter(|l| *l > 0) {
        qb.push(" LIMIT ").push_bind(limit);
    }
    if let Some(offset) = filter.offset.filter(|o| *o > 0) {
        qb.push(" OFFSET ").push_bind(offset);
    }
}

#[async_trait]
impl ArtifactRepository for PgArtifactRepository {
    #[instrument(skip(self, artifact), fields(artifact_id = %artifact.id, name = %artifact.name))]
    async fn index(&self, artifact: &Artifact) -> DomainResult<()> {
        if artifact.id.trim().is_empty() || artifact.name.trim().is_empty() {
            return Err(DomainError::Validation("artifact id and name are required".to_string()));
        }

        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();

        sqlx::query(
            r#"INSERT INTO artifacts (id, user_id, session_id, name, path, source, source_agent_id,
               purpose, content_type, size_bytes, checksum, created_at, updated_at, last_accessed_at,
               access_count, tags, metadata_json, deleted_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
               ON CONFLICT (id) DO UPDATE SET
                   session_id = EXCLUDED.session_id,
                   name = EXCLUDED.name,
                   path = EXCLUDED.path,
                   source = EXCLUDED.source,
                   source_agent_id = EXCLUDED.source_agent_id,
                   purpose = EXCLUDED.purpose,
                   content_type = EXCLUDED.content_type,
                   size_bytes = EXCLUDED.size_bytes,
                   checksum = EXCLUDED.checksum,
                   updated_at = EXCLUDED.updated_at,
                   last_accessed_at = EXCLUDED.last_accessed_at,
                   access_count = EXCLUDED.access_count,
                   tags = EXCLUDED.tags,
                   metadata_json = EXCLUDED.metadata_json,
                   deleted_at = EXCLUDED.deleted_at"#,
        )
        .bind(&artifact.id)
        .bind(&tenant)
        .bind(&artifact.session_id)
        .bind(&artifact.name)
        .bind(&artifact.path)
        .bind(artifact.source.as_str())
        .bind(&artifact.source_agent_id)
        .bind(&artifact.purpose)
        .bind(&artifact.content_type)
        .bind(artifact.size_bytes)
        .bind(&artifact.checksum)
        .bind(artifact.created_at)
        .bind(artifact.updated_at)
        .bind(artifact.last_accessed_at)
        .bind(artifact.access_count)
        .bind(Json(&artifact.tags))
        .bind(Json(&artifact.metadata))
        .bind(artifact.deleted_at)
        .execute(tx.conn())
        .await
        .db_context("index artifact")?;

        tx.commit().await
    }

    #[instrument(skip(self))]
    async fn get(&self, artifact_id: &str) -> DomainResult<Option<Artifact>> {
        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();

        let sql = format!(
            "SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL"
        );
        let row: Option<ArtifactRow> = sqlx::query_as(&sql)
            .bind(artifact_id)
            .bind(&tenant)
            .fetch_optional(tx.conn())
            .await
            .db_context("get artifact")?;

        tx.commit().await?;
        row.map(TryInto::try_into).transpose()
    }

    #[instrument(skip(self))]
    async fn get_by_name(&self, name: &str, session_id: Option<&str>) -> DomainResult<Option<Artifact>> {
        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();

        // With a session, prefer its artifact and fall back to unscoped ones.
        let session_id = session_id.filter(|s| !s.is_empty());
        let sql = format!(
            "SELECT {ARTIFACT_COLUMNS} FROM artifacts
             WHERE name = $1 AND user_id = $2 AND deleted_at IS NULL
               AND ($3::TEXT IS NULL OR session_id = $3 OR session_id IS NULL)
             ORDER BY CASE WHEN session_id = $3 THEN 0 ELSE 1 END, created_at DESC
             LIMIT 1"
        );
        let row: Option<ArtifactRow> = sqlx::query_as(&sql)
            .bind(name)
            .bind(&tenant)
            .bind(session_id)
            .fetch_optional(tx.conn())
            .await
            .db_context("get artifact by name")?;

        tx.commit().await?;
        row.map(TryInto::try_into).transpose()
    }

    #[instrument(skip(self, filter))]
    async fn list(&self, filter: &ArtifactFilter) -> DomainResult<Vec<Artifact>> {
        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE user_id = "));
        qb.push_bind(tenant);
        push_filter(&mut qb, filter);

        let rows: Vec<ArtifactRow> = qb
            .build_query_as()
            .fetch_all(tx.conn())
            .await
            .db_context("list artifacts")?;

        tx.commit().await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    #[instrument(skip(self, query))]
    async fn search(
        &self,
        query: &str,
        session_id: Option<&str>,
        limit: Option<i64>,
    ) -> DomainResult<Vec<Artifact>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();

        let sql = format!(
            "SELECT {ARTIFACT_COLUMNS} FROM artifacts
             WHERE user_id = $1 AND deleted_at IS NULL
               AND artifact_search @@ websearch_to_tsquery('english', $2)
               AND ($3::TEXT IS NULL OR session_id = $3)
             ORDER BY ts_rank_cd(artifact_search, websearch_to_tsquery('english', $2)) DESC, created_at DESC
             LIMIT $4"
        );
        let rows: Vec<ArtifactRow> = sqlx::query_as(&sql)
            .bind(&tenant)
            .bind(query)
            .bind(session_id.filter(|s| !s.is_empty()))
            .bind(limit.filter(|l| *l > 0).unwrap_or(DEFAULT_SEARCH_LIMIT))
            .fetch_all(tx.conn())
            .await
            .db_context("search artifacts")?;

        tx.commit().await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    #[instrument(skip(self))]
    async fn soft_delete(&self, artifact_id: &str) -> DomainResult<()> {
        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();

        let result = sqlx::query(
            "UPDATE artifacts SET deleted_at = NOW() WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL",
        )
        .bind(artifact_id)
        .bind(&tenant)
        .execute(tx.conn())
        .await
        .db_context("soft delete artifact")?;

        tx.commit().await?;
        if result.rows_affected() == 0 {
            audit::record(
                self.audit.as_ref(),
                AuditEvent::new(AuditEventType::ZeroRowDelete, "soft_delete_artifact", &tenant)
                    .resource(artifact_id)
                    .outcome(AuditOutcome::NoEffect),
            )
            .await;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, artifact_id: &str) -> DomainResult<()> {
        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();

        sqlx::query("DELETE FROM artifacts WHERE id = $1 AND user_id = $2")
            .bind(artifact_id)
            .bind(&tenant)
            .execute(tx.conn())
            .await
            .db_context("delete artifact")?;

        tx.commit().await
    }

    #[instrument(skip(self))]
    async fn record_access(&self, artifact_id: &str) -> DomainResult<()> {
        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();

        sqlx::query(
            r#"UPDATE artifacts SET last_accessed_at = NOW(), access_count = access_count + 1
               WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL"#,
        )
        .bind(artifact_id)
        .bind(&tenant)
        .execute(tx.conn())
        .await
        .db_context("record artifact access")?;

        tx.commit().await
    }

    #[instrument(skip(self))]
    async fn stats(&self) -> DomainResult<ArtifactStats> {
        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();

        let (total_files, total_size_bytes, user_files, generated_files, deleted_files): (i64, i64, i64, i64, i64) =
            sqlx::query_as(
                r#"SELECT
                       COUNT(*) FILTER (WHERE deleted_at IS NULL),
                       COALESCE(SUM(size_bytes) FILTER (WHERE deleted_at IS NULL), 0)::BIGINT,
                       COUNT(*) FILTER (WHERE source = 'user' AND deleted_at IS NULL),
                       COUNT(*) FILTER (WHERE source = 'generated' AND deleted_at IS NULL),
                       COUNT(*) FILTER (WHERE deleted_at IS NOT NULL)
                   FROM artifacts WHERE user_id = $1"#,
            )
            .bind(&tenant)
            .fetch_one(tx.conn())
            .await
            .db_context("artifact stats")?;

        tx.commit().await?;
        Ok(ArtifactStats {
            total_files,
            total_size_bytes,
            user_files,
            generated_files,
            deleted_files,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ArtifactRow {
    id: String,
    user_id: String,
    session_id: Option<String>,
    name: String,
    path: String,
    source: String,
    source_agent_id: Option<String>,
    purpose: Option<String>,
    content_type: String,
    size_bytes: i64,
    checksum: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_accessed_at: Option<DateTime<Utc>>,
    access_count: i64,
    tags: Json<Vec<String>>,
    metadata_json: Json<Map<String, Value>>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<ArtifactRow> for Artifact {
    type Error = DomainError;

    fn try_from(row: ArtifactRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            session_id: row.session_id,
            name: row.name,
            path: row.path,
            source: row.source.parse()?,
            source_agent_id: row.source_agent_id,
            purpose: row.purpose,
            content_type: row.content_type,
            size_bytes: row.size_bytes,
            checksum: row.checksum,
            tags: row.tags.0,
            metadata: row.metadata_json.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_accessed_at: row.last_accessed_at,
            access_count: row.access_count,
            deleted_at: row.deleted_at,
        })
    }
}
