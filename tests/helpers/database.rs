use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use agentstore::adapters::postgres::{create_pool, Migrator, PrivilegedExecutor, TenantExecutor};
use agentstore::{tenant, TenantId};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::str::FromStr;

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Connect to `DATABASE_URL` and bring the schema up to date
///
/// The role must neither be a superuser nor have `BYPASSRLS`, otherwise the
/// row-level security policies under test would not apply to it.
///
/// # Example
/// ```ignore
/// #[tokio::test]
/// #[ignore = "requires DATABASE_URL"]
/// async fn my_test() {
///     let pool = setup_test_db().await;
///     // Use pool for testing...
///     teardown_test_db(pool).await;
/// }
/// ```
pub async fn setup_test_db() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");
    let pool = create_pool(&url, None).await.expect("failed to connect to DATABASE_URL");

    let bypasses: bool =
        sqlx::query_scalar("SELECT rolsuper OR rolbypassrls FROM pg_roles WHERE rolname = current_user")
            .fetch_one(&pool)
            .await
            .expect("failed to inspect role");
    assert!(
        !bypasses,
        "DATABASE_URL must use a role without SUPERUSER or BYPASSRLS so policies apply"
    );

    Migrator::new(pool.clone())
        .migrate_up()
        .await
        .expect("failed to run migrations");
    pool
}

/// Privileged pool from `ADMIN_DATABASE_URL`, or `None` when it is not set.
pub async fn setup_admin_db() -> Option<PgPool> {
    let url = std::env::var("ADMIN_DATABASE_URL").ok()?;
    Some(create_pool(&url, None).await.expect("failed to connect to ADMIN_DATABASE_URL"))
}

pub async fn privileged_executor(pool: &PgPool) -> PrivilegedExecutor {
    PrivilegedExecutor::connect(pool.clone())
        .await
        .expect("ADMIN_DATABASE_URL role must bypass row-level security")
}

pub fn tenant_executor(pool: &PgPool) -> TenantExecutor {
    TenantExecutor::new(pool.clone())
}

/// A freshly created, empty schema on `DATABASE_URL`.
///
/// Every connection of `pool` resolves unqualified names in that schema, so
/// migrations run against it start from version 0.
pub struct ScratchSchema {
    pub pool: PgPool,
    name: String,
    owner: PgPool,
}

impl ScratchSchema {
    pub async fn create() -> Self {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");
        let owner = create_pool(&url, None).await.expect("failed to connect to DATABASE_URL");
        let name = unique_id("scratch");
        sqlx::query(&format!("CREATE SCHEMA \"{name}\""))
            .execute(&owner)
            .await
            .expect("role must be allowed to create schemas");

        let options = PgConnectOptions::from_str(&url)
            .expect("valid DATABASE_URL")
            .options([("search_path", name.as_str())]);
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .expect("failed to connect to scratch schema");

        Self { pool, name, owner }
    }

    /// Whether `table` exists in this schema.
    pub async fn has_table(&self, table: &str) -> bool {
        sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(format!("\"{}\".{table}", self.name))
            .fetch_one(&self.owner)
            .await
            .expect("failed to look up table")
    }

    pub async fn remove(self) {
        self.pool.close().await;
        sqlx::query(&format!("DROP SCHEMA \"{}\" CASCADE", self.name))
            .execute(&self.owner)
            .await
            .expect("failed to drop scratch schema");
        self.owner.close().await;
    }
}

/// Closes the connection pool.
pub async fn teardown_test_db(pool: PgPool) {
    pool.close().await;
}

/// Identifier unique across concurrent test runs against one database.
pub fn unique_id(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{prefix}_{nanos}_{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

pub fn unique_tenant(name: &str) -> TenantId {
    TenantId::new(unique_id(name)).expect("valid tenant id")
}

/// Run `fut` with `tenant` bound.
pub async fn as_tenant<F: Future>(tenant: &TenantId, fut: F) -> F::Output {
    tenant::scope(tenant.clone(), fut).await
}
