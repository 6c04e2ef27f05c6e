//! PostgreSQL schema migration management.
//!
//! Migrations are embedded at compile time and applied in version order.
//! Concurrent processes serialize on a session-level advisory lock held on
//! one dedicated connection for the whole run.

use chrono::{DateTime, Utc};
use sqlx::{Connection, Executor, PgConnection, PgPool};
use thiserror::Error;

use crate::infrastructure::logging::audit::{self, AuditEvent, AuditEventType, AuditLogger};

/// Advisory lock key shared by every process migrating this schema.
pub const MIGRATION_LOCK_KEY: i64 = 839_021_573;

const MIGRATOR_ACTOR: &str = "migrator";

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Failed to execute migration {version}: {source}")]
    ExecutionError { version: i64, #[source] source: sqlx::Error },
    #[error("Failed to roll back migration {version}: {source}")]
    RollbackError { version: i64, #[source] source: sqlx::Error },
    #[error("No down migration for version {0}")]
    MissingDownMigration(i64),
    #[error("Failed to get schema version: {0}")]
    VersionCheckError(#[source] sqlx::Error),
    #[error("Failed to acquire migration lock: {0}")]
    LockError(#[source] sqlx::Error),
    #[error("Invalid migration catalog: {0}")]
    InvalidCatalog(String),
}

#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub up_sql: &'static str,
    pub down_sql: Option<&'static str>,
}

/// A row of `schema_migrations`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, serde::Serialize)]
pub struct AppliedMigration {
    pub version: i64,
    pub description: Option<String>,
    pub applied_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Migrator {
    pool: PgPool,
    migrations: Vec<Migration>,
    audit: Option<AuditLogger>,
}

impl Migrator {
    /// Migrator over the embedded catalog.
    pub fn new(pool: PgPool) -> Self {
        Self::with_migrations(pool, all_embedded_migrations())
    }

    pub fn with_migrations(pool: PgPool, migrations: Vec<Migration>) -> Self {
        Self {
            pool,
            migrations,
            audit: None,
        }
    }

    #[must_use]
    pub fn with_audit(mut self, audit: Option<AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Apply every migration newer than the current version.
    ///
    /// Returns the number of migrations applied. A failing migration aborts
    /// the run; migrations applied before it stay applied.
    pub async fn migrate_up(&self) -> Result<usize, MigrationError> {
        validate_catalog(&self.migrations)?;

        let mut lock = MigrationLock::acquire(&self.pool).await?;
        let outcome = self.apply_pending(lock.conn()).await;
        lock.release().await;
        outcome
    }

    /// Revert the `steps` most recently applied migrations, newest first.
    ///
    /// Returns the number of migrations reverted.
    pub async fn migrate_down(&self, steps: usize) -> Result<usize, MigrationError> {
        if steps == 0 {
            return Ok(0);
        }

        let mut lock = MigrationLock::acquire(&self.pool).await?;
        let outcome = self.revert(lock.conn(), steps).await;
        lock.release().await;
        outcome
    }

    pub async fn current_version(&self) -> Result<i64, MigrationError> {
        let mut conn = self.pool.acquire().await.map_err(MigrationError::VersionCheckError)?;
        current_version(&mut conn).await
    }

    /// Catalog entries newer than the current version.
    pub async fn pending_migrations(&self) -> Result<Vec<Migration>, MigrationError> {
        let current = self.current_version().await?;
        Ok(self
            .migrations
            .iter()
            .filter(|m| m.version > current)
            .cloned()
            .collect())
    }

    pub async fn applied_migrations(&self) -> Result<Vec<AppliedMigration>, MigrationError> {
        let mut conn = self.pool.acquire().await.map_err(MigrationError::VersionCheckError)?;
        if !migrations_table_exists(&mut conn).await? {
            return Ok(Vec::new());
        }
        sqlx::query_as(
            "SELECT version::BIGINT AS version, description, applied_at
             FROM schema_migrations ORDER BY version",
        )
        .fetch_all(&mut *conn)
        .await
        .map_err(MigrationError::VersionCheckError)
    }

    async fn apply_pending(&self, conn: &mut PgConnection) -> Result<usize, MigrationError> {
        ensure_migrations_table(conn).await?;
        let current = current_version(conn).await?;

        let pending: Vec<&Migration> = self.migrations.iter().filter(|m| m.version > current).collect();

        let mut applied = 0;
        for migration in pending {
            apply_migration(conn, migration).await?;
            applied += 1;

            tracing::info!(
                version = migration.version,
                description = migration.description,
                "applied migration"
            );
            audit::record(
                self.audit.as_ref(),
                AuditEvent::new(AuditEventType::MigrationApplied, "migrate_up", MIGRATOR_ACTOR)
                    .resource(migration.version.to_string()),
            )
            .await;
        }

        if applied == 0 {
            tracing::debug!(version = current, "schema is up to date");
        }
        Ok(applied)
    }

    async fn revert(&self, conn: &mut PgConnection, steps: usize) -> Result<usize, MigrationError> {
        if !migrations_table_exists(conn).await? {
            return Ok(0);
        }

        let limit = i64::try_from(steps).unwrap_or(i64::MAX);
        let versions: Vec<i64> = sqlx::query_scalar(
            "SELECT version::BIGINT FROM schema_migrations ORDER BY version DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&mut *conn)
        .await
        .map_err(MigrationError::VersionCheckError)?;

        let mut reverted = 0;
        for version in versions {
            let down_sql = self.down_sql(version)?;

            revert_migration(conn, version, down_sql).await?;
            reverted += 1;

            tracing::info!(version, "rolled back migration");
            audit::record(
                self.audit.as_ref(),
                AuditEvent::new(AuditEventType::MigrationRolledBack, "migrate_down", MIGRATOR_ACTOR)
                    .resource(version.to_string()),
            )
            .await;
        }
        Ok(reverted)
    }

    fn down_sql(&self, version: i64) -> Result<&'static str, MigrationError> {
        self.migrations
            .iter()
            .find(|m| m.version == version)
            .and_then(|m| m.down_sql)
            .ok_or(MigrationError::MissingDownMigration(version))
    }
}

/// Session-level advisory lock held on a connection detached from the pool.
///
/// The connection never goes back to the pool, so a run that is cancelled or
/// panics before `release` closes the session and the server drops the lock.
struct MigrationLock {
    conn: PgConnection,
}

impl MigrationLock {
    async fn acquire(pool: &PgPool) -> Result<Self, MigrationError> {
        let mut conn = pool.acquire().await.map_err(MigrationError::LockError)?.detach();
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut conn)
            .await
            .map_err(MigrationError::LockError)?;
        tracing::debug!(key = MIGRATION_LOCK_KEY, "acquired migration lock");
        Ok(Self { conn })
    }

    fn conn(&mut self) -> &mut PgConnection {
        &mut self.conn
    }

    /// Unlock and close the connection. Best effort: closing alone releases the lock.
    async fn release(mut self) {
        if let Err(e) = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut self.conn)
            .await
        {
            tracing::warn!(error = %e, "failed to release migration lock; closing connection");
        } else {
            tracing::debug!(key = MIGRATION_LOCK_KEY, "released migration lock");
        }
        if let Err(e) = self.conn.close().await {
            tracing::debug!(error = %e, "migration connection did not close cleanly");
        }
    }
}

async fn ensure_migrations_table(conn: &mut PgConnection) -> Result<(), MigrationError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            description TEXT
        )",
    )
    .execute(&mut *conn)
    .await
    .map_err(|e| MigrationError::ExecutionError { version: 0, source: e })?;
    Ok(())
}

async fn migrations_table_exists(conn: &mut PgConnection) -> Result<bool, MigrationError> {
    sqlx::query_scalar("SELECT to_regclass('schema_migrations') IS NOT NULL")
        .fetch_one(&mut *conn)
        .await
        .map_err(MigrationError::VersionCheckError)
}

async fn current_version(conn: &mut PgConnection) -> Result<i64, MigrationError> {
    if !migrations_table_exists(conn).await? {
        return Ok(0);
    }
    sqlx::query_scalar("SELECT COALESCE(MAX(version), 0)::BIGINT FROM schema_migrations")
        .fetch_one(&mut *conn)
        .await
        .map_err(MigrationError::VersionCheckError)
}

async fn apply_migration(conn: &mut PgConnection, migration: &Migration) -> Result<(), MigrationError> {
    let version = migration.version;
    let to_error = |source| MigrationError::ExecutionError { version, source };

    let mut tx = conn.begin().await.map_err(to_error)?;
    (&mut *tx).execute(sqlx::raw_sql(migration.up_sql)).await.map_err(to_error)?;
    sqlx::query(
        "INSERT INTO schema_migrations (version, description) VALUES ($1, $2)
         ON CONFLICT (version) DO NOTHING",
    )
    .bind(i32::try_from(version).map_err(|_| {
        MigrationError::InvalidCatalog(format!("version {version} does not fit in INTEGER"))
    })?)
    .bind(migration.description)
    .execute(&mut *tx)
    .await
    .map_err(to_error)?;
    tx.commit().await.map_err(to_error)
}

async fn revert_migration(conn: &mut PgConnection, version: i64, down_sql: &str) -> Result<(), MigrationError> {
    let to_error = |source| MigrationError::RollbackError { version, source };

    let mut tx = conn.begin().await.map_err(to_error)?;
    (&mut *tx).execute(sqlx::raw_sql(down_sql)).await.map_err(to_error)?;
    sqlx::query("DELETE FROM schema_migrations WHERE version = $1")
        .bind(version)
        .execute(&mut *tx)
        .await
        .map_err(to_error)?;
    tx.commit().await.map_err(to_error)
}

/// Versions must be positive and strictly increasing.
pub fn validate_catalog(migrations: &[Migration]) -> Result<(), MigrationError> {
    let mut previous = 0;
    for migration in migrations {
        if migration.version <= previous {
            return Err(MigrationError::InvalidCatalog(format!(
                "version {} must be positive and greater than {previous}",
                migration.version
            )));
        }
        if i32::try_from(migration.version).is_err() {
            return Err(MigrationError::InvalidCatalog(format!(
                "version {} does not fit in INTEGER",
                migration.version
            )));
        }
        previous = migration.version;
    }
    Ok(())
}

pub fn core_sessions_migration() -> Migration {
    Migration {
        version: 1,
        description: "Core session tables",
        up_sql: include_str!("../../../migrations/000001_core_sessions.up.sql"),
        down_sql: Some(include_str!("../../../migrations/000001_core_sessions.down.sql")),
    }
}

pub fn artifacts_migration() -> Migration {
    Migration {
        version: 2,
        description: "Artifacts",
        up_sql: include_str!("../../../migrations/000002_artifacts.up.sql"),
        down_sql: Some(include_str!("../../../migrations/000002_artifacts.down.sql")),
    }
}

pub fn errors_and_results_migration() -> Migration {
    Migration {
        version: 3,
        description: "Agent errors and result metadata",
        up_sql: include_str!("../../../migrations/000003_errors_and_results.up.sql"),
        down_sql: Some(include_str!("../../../migrations/000003_errors_and_results.down.sql")),
    }
}

pub fn row_level_security_migration() -> Migration {
    Migration {
        version: 4,
        description: "Row-level security policies",
        up_sql: include_str!("../../../migrations/000004_row_level_security.up.sql"),
        down_sql: Some(include_str!("../../../migrations/000004_row_level_security.down.sql")),
    }
}

pub fn all_embedded_migrations() -> Vec<Migration> {
    vec![
        core_sessions_migration(),
        artifacts_migration(),
        errors_and_results_migration(),
        row_level_security_migration(),
    ]
}
