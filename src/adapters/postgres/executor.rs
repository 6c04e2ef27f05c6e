//! Transaction executors.
//!
//! Two distinct entry points open transactions:
//! - [`TenantExecutor`] binds the current tenant into the transaction before
//!   handing it out. Every tenant-scoped repository uses it exclusively.
//! - [`PrivilegedExecutor`] binds nothing and only exists for a connection
//!   whose role bypasses row-level security.
//!
//! Both return guards. Dropping a guard without calling `commit` rolls the
//! transaction back when its connection goes back to the pool, which covers
//! early `?` returns, panics and cancelled futures alike.

use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use crate::domain::errors::{DbResultExt, DomainError, DomainResult};
use crate::domain::tenant::TenantId;

/// Transaction-local setting read by the row-level security policies.
pub const TENANT_SETTING: &str = "app.current_tenant";

#[derive(Clone)]
pub struct TenantExecutor {
    pool: PgPool,
}

impl TenantExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Open a transaction bound to the current tenant.
    ///
    /// Fails with `MissingTenant` before touching the pool when no tenant is bound.
    pub async fn begin(&self) -> DomainResult<ScopedTransaction> {
        let tenant = TenantId::current()?;
        let mut tx = self.pool.begin().await.db_context("begin transaction")?;

        // is_local = true: the setting reverts at COMMIT/ROLLBACK and never
        // survives on the pooled connection.
        sqlx::query("SELECT set_config($1, $2, true)")
            .bind(TENANT_SETTING)
            .bind(tenant.as_str())
            .execute(&mut *tx)
            .await
            .db_context("bind tenant")?;

        Ok(ScopedTransaction { tx, tenant })
    }
}

/// Transaction bound to one tenant.
pub struct ScopedTransaction {
    tx: Transaction<'static, Postgres>,
    tenant: TenantId,
}

impl ScopedTransaction {
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.tx
    }

    pub async fn commit(self) -> DomainResult<()> {
        self.tx.commit().await.db_context("commit transaction")
    }
}

/// Executor for a connection whose role bypasses row-level security.
#[derive(Clone)]
pub struct PrivilegedExecutor {
    pool: PgPool,
}

impl PrivilegedExecutor {
    /// Wrap `pool` after checking its role is a superuser or has `BYPASSRLS`.
    ///
    /// A role without either would silently see zero rows through the
    /// policies, so it is rejected here instead.
    pub async fn connect(pool: PgPool) -> DomainResult<Self> {
        let (role, bypasses): (String, bool) = sqlx::query_as(
            "SELECT rolname::text, (rolsuper OR rolbypassrls)
             FROM pg_roles WHERE rolname = current_user",
        )
        .fetch_one(&pool)
        .await
        .db_context("verify admin privilege")?;

        if !bypasses {
            return Err(DomainError::PrivilegeMissing(format!(
                "role {role} has neither SUPERUSER nor BYPASSRLS"
            )));
        }

        tracing::debug!(role = %role, "privileged executor ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn begin(&self) -> DomainResult<PrivilegedTransaction> {
        let tx = self.pool.begin().await.db_context("begin privileged transaction")?;
        Ok(PrivilegedTransaction { tx })
    }
}

/// Transaction with no tenant binding.
pub struct PrivilegedTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PrivilegedTransaction {
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.tx
    }

    pub async fn commit(self) -> DomainResult<()> {
        self.tx.commit().await.db_context("commit privileged transaction")
    }
}
