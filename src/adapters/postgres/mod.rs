//! PostgreSQL adapters for the agentstore persistence layer.
//!
//! Tenant isolation is enforced by row-level security. Every tenant-scoped
//! repository opens its transactions through [`TenantExecutor`]; only
//! [`PgAdminRepository`] uses the [`PrivilegedExecutor`].

pub mod admin_repository;
pub mod artifact_repository;
pub mod backend;
pub mod connection;
pub mod error_repository;
pub mod executor;
pub mod migrations;
pub mod result_repository;
pub mod session_repository;

pub use admin_repository::PgAdminRepository;
pub use artifact_repository::PgArtifactRepository;
pub use backend::StorageBackend;
pub use connection::{create_pool, verify_connection, ConnectionError, PoolConfig};
pub use error_repository::PgErrorRepository;
pub use executor::{PrivilegedExecutor, PrivilegedTransaction, ScopedTransaction, TenantExecutor, TENANT_SETTING};
pub use migrations::{all_embedded_migrations, AppliedMigration, Migration, MigrationError, Migrator};
pub use result_repository::PgResultRepository;
pub use session_repository::PgSessionRepository;

use sqlx::PgPool;

use crate::domain::errors::DomainError;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
    #[error("Storage error: {0}")]
    Domain(#[from] DomainError),
    #[error("Audit log error: {0}")]
    Audit(String),
}

/// Connect to `database_url` and apply all pending migrations.
pub async fn initialize_database(database_url: &str) -> Result<PgPool, DatabaseError> {
    let pool = create_pool(database_url, None).await?;
    let applied = Migrator::new(pool.clone()).migrate_up().await?;
    tracing::info!(applied, "database initialized");
    Ok(pool)
}
