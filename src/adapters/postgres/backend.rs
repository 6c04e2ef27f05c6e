//! Storage backend façade wiring pools, migrator and repositories.

use sqlx::PgPool;
use std::sync::Arc;

use super::{
    create_pool, DatabaseError, Migrator, PgAdminRepository, PgArtifactRepository, PgErrorRepository,
    PgResultRepository, PgSessionRepository, PoolConfig, PrivilegedExecutor, TenantExecutor,
};
use crate::domain::models::Config;
use crate::domain::ports::{AdminRepository, ArtifactRepository, ErrorRepository, ResultRepository, SessionRepository};
use crate::infrastructure::logging::{redact_database_url, AuditLogger};

/// One handle to the whole persistence layer.
///
/// The tenant-scoped repositories share the application pool. The admin
/// repository only exists when `database.admin_url` is configured, and its
/// connection must bypass row-level security.
pub struct StorageBackend {
    pool: PgPool,
    admin_pool: Option<PgPool>,
    migrator: Migrator,
    sessions: Arc<PgSessionRepository>,
    artifacts: Arc<PgArtifactRepository>,
    errors: Arc<PgErrorRepository>,
    results: Arc<PgResultRepository>,
    admin: Option<Arc<PgAdminRepository>>,
}

impl StorageBackend {
    pub async fn connect(config: &Config) -> Result<Self, DatabaseError> {
        let db = &config.database;
        let pool_config = PoolConfig::from(db);
        let pool = create_pool(&db.url, Some(pool_config.clone())).await?;

        let audit = match &config.logging.audit_log_path {
            Some(path) => Some(
                AuditLogger::new(path)
                    .await
                    .map_err(|e| DatabaseError::Audit(format!("{e:#}")))?,
            ),
            None => None,
        };

        let migrator = Migrator::new(pool.clone()).with_audit(audit.clone());
        if db.auto_migrate {
            let applied = migrator.migrate_up().await?;
            tracing::info!(applied, "schema up to date");
        }

        let (admin_pool, admin) = match &db.admin_url {
            Some(admin_url) => {
                let admin_pool = create_pool(admin_url, Some(pool_config)).await?;
                let executor = PrivilegedExecutor::connect(admin_pool.clone()).await?;
                let admin = Arc::new(PgAdminRepository::new(executor).with_audit(audit.clone()));
                tracing::info!(url = %redact_database_url(admin_url), "admin store enabled");
                (Some(admin_pool), Some(admin))
            }
            None => (None, None),
        };

        let executor = TenantExecutor::new(pool.clone());
        let mut sessions = PgSessionRepository::new(executor.clone()).with_audit(audit.clone());
        if let Some(admin) = &admin {
            sessions = sessions.with_admin_probe(Arc::clone(admin));
        }

        Ok(Self {
            migrator,
            sessions: Arc::new(sessions),
            artifacts: Arc::new(PgArtifactRepository::new(executor.clone()).with_audit(audit.clone())),
            errors: Arc::new(PgErrorRepository::new(executor.clone())),
            results: Arc::new(PgResultRepository::new(executor).with_audit(audit)),
            admin,
            admin_pool,
            pool,
        })
    }

    pub fn sessions(&self) -> Arc<dyn SessionRepository> {
        self.sessions.clone()
    }

    pub fn artifacts(&self) -> Arc<dyn ArtifactRepository> {
        self.artifacts.clone()
    }

    pub fn errors(&self) -> Arc<dyn ErrorRepository> {
        self.errors.clone()
    }

    pub fn results(&self) -> Arc<dyn ResultRepository> {
        self.results.clone()
    }

    /// `None` unless an admin connection was configured.
    pub fn admin(&self) -> Option<Arc<dyn AdminRepository>> {
        self.admin.clone().map(|a| a as Arc<dyn AdminRepository>)
    }

    pub fn migrator(&self) -> &Migrator {
        &self.migrator
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close every pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
        if let Some(admin_pool) = &self.admin_pool {
            admin_pool.close().await;
        }
        tracing::debug!("storage backend closed");
    }
}
