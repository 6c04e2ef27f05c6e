//! Result cache backed by one physical table per stored result.
//!
//! Every dynamic table carries two hidden columns: an insertion ordinal and
//! the owning tenant. The tenant column defaults to the transaction's tenant
//! setting and is guarded by the table's own row-level security policy, so a
//! result table is isolated even from a caller who guesses its name.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgConnection, Postgres, QueryBuilder, Row};
use tracing::instrument;

use super::executor::{TenantExecutor, TENANT_SETTING};
use crate::domain::errors::{DbResultExt, DomainError, DomainResult};
use crate::domain::models::result::{
    estimate_size, quote_ident, result_table_name, validate_column_name, validate_result_id, ORDINAL_COLUMN,
    TENANT_COLUMN,
};
use crate::domain::models::{QueryResult, ResultMetadata, TabularData};
use crate::domain::ports::ResultRepository;
use crate::infrastructure::logging::audit::{self, AuditEvent, AuditEventType, AuditLogger, AuditOutcome};

/// PostgreSQL accepts at most 65535 bind parameters per statement.
const MAX_BIND_PARAMS: usize = 65_535;

#[derive(Clone)]
pub struct PgResultRepository {
    executor: TenantExecutor,
    audit: Option<AuditLogger>,
}

impl PgResultRepository {
    pub fn new(executor: TenantExecutor) -> Self {
        Self { executor, audit: None }
    }

    #[must_use]
    pub fn with_audit(mut self, audit: Option<AuditLogger>) -> Self {
        self.audit = audit;
        self
    }
}

fn create_table_sql(table: &str, columns: &[String]) -> String {
    let mut defs = vec![
        format!("{} BIGINT NOT NULL", quote_ident(ORDINAL_COLUMN)),
        format!(
            "{} TEXT NOT NULL DEFAULT current_setting('{TENANT_SETTING}', true)",
            quote_ident(TENANT_COLUMN)
        ),
    ];
    defs.extend(columns.iter().map(|c| format!("{} TEXT", quote_ident(c))));
    format!("CREATE TABLE {} ({})", quote_ident(table), defs.join(", "))
}

fn policy_sql(table: &str) -> [String; 3] {
    let quoted = quote_ident(table);
    [
        format!("ALTER TABLE {quoted} ENABLE ROW LEVEL SECURITY"),
        format!("ALTER TABLE {quoted} FORCE ROW LEVEL SECURITY"),
        format!(
            "CREATE POLICY tenant_isolation ON {quoted} \
             USING ({tenant} = current_setting('{TENANT_SETTING}', true)) \
             WITH CHECK ({tenant} = current_setting('{TENANT_SETTING}', true))",
            tenant = quote_ident(TENANT_COLUMN)
        ),
    ]
}

fn select_sql(table: &str, columns: &[String]) -> String {
    let mut projection = vec![quote_ident(ORDINAL_COLUMN)];
    projection.extend(columns.iter().map(|c| quote_ident(c)));
    format!(
        "SELECT {} FROM {} ORDER BY {}",
        projection.join(", "),
        quote_ident(table),
        quote_ident(ORDINAL_COLUMN)
    )
}

/// Rows per INSERT so one statement stays under the bind parameter limit.
fn insert_chunk_rows(column_count: usize) -> usize {
    (MAX_BIND_PARAMS / (column_count + 1)).max(1)
}

async fn execute_ddl(conn: &mut PgConnection, sql: &str, operation: &str) -> DomainResult<()> {
    sqlx::query(sql)
        .persistent(false)
        .execute(conn)
        .await
        .db_context(operation)?;
    Ok(())
}

async fn table_exists(conn: &mut PgConnection, table: &str) -> DomainResult<bool> {
    sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
        .bind(quote_ident(table))
        .fetch_one(conn)
        .await
        .db_context("check result table")
}

async fn fetch_metadata(conn: &mut PgConnection, result_id: &str, tenant: &str) -> DomainResult<Option<ResultMetadata>> {
    let row: Option<MetadataRow> = sqlx::query_as(
        r#"SELECT id, user_id, table_name, row_count, column_count, columns_json, stored_at, accessed_at, size_bytes
           FROM sql_result_metadata WHERE id = $1 AND user_id = $2"#,
    )
    .bind(result_id)
    .bind(tenant)
    .fetch_optional(conn)
    .await
    .db_context("get result metadata")?;

    Ok(row.map(Into::into))
}

async fn insert_rows(
    conn: &mut PgConnection,
    table: &str,
    columns: &[String],
    rows: &[Vec<Option<String>>],
) -> DomainResult<()> {
    let mut target = vec![quote_ident(ORDINAL_COLUMN)];
    target.extend(columns.iter().map(|c| quote_ident(c)));
    let insert_head = format!("INSERT INTO {} ({}) ", quote_ident(table), target.join(", "));

    let mut ordinal: i64 = 0;
    for chunk in rows.chunks(insert_chunk_rows(columns.len())) {
        let mut qb = QueryBuilder::<Postgres>::new(&insert_head);
        qb.push_values(chunk, |mut b, row| {
            ordinal += 1;
            b.push_bind(ordinal);
            for value in row {
                b.push_bind(value.clone());
            }
        });
        qb.build()
            .persistent(false)
            .execute(&mut *conn)
            .await
            .db_context("insert result rows")?;
    }
    Ok(())
}

#[async_trait]
impl ResultRepository for PgResultRepository {
    #[instrument(skip(self, data), fields(rows = data.row_count()))]
    async fn store(&self, result_id: &str, data: &TabularData) -> DomainResult<ResultMetadata> {
        let table = result_table_name(result_id)?;
        let columns = data.columns();
        for column in &columns {
            validate_column_name(column)?;
        }
        let rows = data.text_rows(&columns);

        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();

        let existing = fetch_metadata(tx.conn(), result_id, &tenant).await?;
        if existing.is_some() {
            execute_ddl(tx.conn(), &format!("DROP TABLE IF EXISTS {}", quote_ident(&table)), "drop previous result table")
                .await?;
        } else if table_exists(tx.conn(), &table).await? {
            audit::record(
                self.audit.as_ref(),
                AuditEvent::new(AuditEventType::PolicyViolation, "store_result", &tenant)
                    .resource(result_id)
                    .outcome(AuditOutcome::Failure)
                    .metadata(json!({ "table": table })),
            )
            .await;
            return Err(DomainError::PolicyViolation {
                operation: "store result".to_string(),
                message: format!("result {result_id} belongs to another tenant"),
            });
        }

        execute_ddl(tx.conn(), &create_table_sql(&table, &columns), "create result table").await?;
        for statement in policy_sql(&table) {
            execute_ddl(tx.conn(), &statement, "secure result table").await?;
        }
        insert_rows(tx.conn(), &table, &columns, &rows).await?;

        let now = Utc::now();
        let metadata = ResultMetadata {
            id: result_id.to_string(),
            user_id: tenant,
            table_name: table,
            row_count: i64::try_from(rows.len()).unwrap_or(i64::MAX),
            column_count: i32::try_from(columns.len()).unwrap_or(i32::MAX),
            size_bytes: estimate_size(&columns, &rows),
            columns,
            stored_at: now,
            accessed_at: now,
        };

        sqlx::query(
            r#"INSERT INTO sql_result_metadata (id, user_id, table_name, row_count, column_count,
               columns_json, stored_at, accessed_at, size_bytes)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
               ON CONFLICT (id) DO UPDATE SET
                   table_name = EXCLUDED.table_name,
                   row_count = EXCLUDED.row_count,
                   column_count = EXCLUDED.column_count,
                   columns_json = EXCLUDED.columns_json,
                   stored_at = EXCLUDED.stored_at,
                   accessed_at = EXCLUDED.accessed_at,
                   size_bytes = EXCLUDED.size_bytes"#,
        )
        .bind(&metadata.id)
        .bind(&metadata.user_id)
        .bind(&metadata.table_name)
        .bind(metadata.row_count)
        .bind(metadata.column_count)
        .bind(Json(&metadata.columns))
        .bind(metadata.stored_at)
        .bind(metadata.accessed_at)
        .bind(metadata.size_bytes)
        .execute(tx.conn())
        .await
        .db_context("store result metadata")?;

        tx.commit().await?;
        tracing::debug!(
            result_id,
            rows = metadata.row_count,
            columns = metadata.column_count,
            "stored result"
        );
        Ok(metadata)
    }

    #[instrument(skip(self, filter))]
    async fn query(&self, result_id: &str, filter: Option<&str>) -> DomainResult<QueryResult> {
        if filter.is_some_and(|f| !f.trim().is_empty()) {
            return Err(DomainError::Validation(
                "custom SQL predicates are not supported; query without a filter".to_string(),
            ));
        }
        validate_result_id(result_id)?;

        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();

        let Some(metadata) = fetch_metadata(tx.conn(), result_id, &tenant).await? else {
            return Err(DomainError::not_found("result", result_id));
        };

        sqlx::query("UPDATE sql_result_metadata SET accessed_at = NOW() WHERE id = $1 AND user_id = $2")
            .bind(result_id)
            .bind(&tenant)
            .execute(tx.conn())
            .await
            .db_context("touch result metadata")?;

        let rows: Vec<PgRow> = sqlx::query(&select_sql(&metadata.table_name, &metadata.columns))
            .persistent(false)
            .fetch_all(tx.conn())
            .await
            .db_context("query result table")?;

        let rows = rows
            .iter()
            .map(|row| {
                (1..=metadata.columns.len())
                    .map(|i| row.try_get::<Option<String>, _>(i))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()
            .db_context("decode result row")?;

        tx.commit().await?;
        Ok(QueryResult {
            columns: metadata.columns,
            rows,
        })
    }

    #[instrument(skip(self))]
    async fn get_metadata(&self, result_id: &str) -> DomainResult<Option<ResultMetadata>> {
        validate_result_id(result_id)?;

        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();
        let metadata = fetch_metadata(tx.conn(), result_id, &tenant).await?;
        tx.commit().await?;
        Ok(metadata)
    }

    #[instrument(skip(self))]
    async fn delete(&self, result_id: &str) -> DomainResult<()> {
        validate_result_id(result_id)?;

        let mut tx = self.executor.begin().await?;
        let tenant = tx.tenant().as_str().to_string();

        let Some(metadata) = fetch_metadata(tx.conn(), result_id, &tenant).await? else {
            tracing::debug!(result_id, "delete matched no result");
            return Ok(());
        };

        execute_ddl(
            tx.conn(),
            &format!("DROP TABLE IF EXISTS {}", quote_ident(&metadata.table_name)),
            "drop result table",
        )
        .await?;

        sqlx::query("DELETE FROM sql_result_metadata WHERE id = $1 AND user_id = $2")
            .bind(result_id)
            .bind(&tenant)
            .execute(tx.conn())
            .await
            .db_context("delete result metadata")?;

        tx.commit().await
    }
}

#[derive(sqlx::FromRow)]
struct MetadataRow {
    id: String,
    user_id: String,
    table_name: String,
    row_count: i64,
    column_count: i32,
    columns_json: Json<Vec<String>>,
    stored_at: DateTime<Utc>,
    accessed_at: DateTime<Utc>,
    size_bytes: i64,
}

impl From<MetadataRow> for ResultMetadata {
    fn from(row: MetadataRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            table_name: row.table_name,
            row_count: row.row_count,
            column_count: row.column_count,
            columns: row.columns_json.0,
            stored_at: row.stored_at,
            accessed_at: row.accessed_at,
            size_bytes: row.size_bytes,
        }
    }
}
