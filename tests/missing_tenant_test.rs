//! Every tenant-scoped operation must refuse to run without a bound tenant,
//! before a connection is ever requested. These tests use an unreachable
//! lazy pool, so they run without a database.

use std::sync::Arc;

use agentstore::adapters::postgres::{
    PgArtifactRepository, PgErrorRepository, PgResultRepository, PgSessionRepository, TenantExecutor,
};
use agentstore::domain::models::ErrorFilter;
use agentstore::{
    tenant, Artifact, ArtifactFilter, ArtifactRepository, ArtifactSource, DomainError, DomainResult, ErrorRepository,
    Message, MessageRole, ResultRepository, Session, SessionRepository, TabularData, TenantId,
};
use sqlx::postgres::PgPoolOptions;

fn unreachable_executor() -> TenantExecutor {
    let pool = PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_millis(200))
        .connect_lazy("postgres://nobody@127.0.0.1:1/none")
        .unwrap();
    TenantExecutor::new(pool)
}

fn assert_missing<T: std::fmt::Debug>(result: DomainResult<T>) {
    match result {
        Err(DomainError::MissingTenant) => {}
        other => panic!("expected MissingTenant, got {other:?}"),
    }
}

#[test]
fn test_session_operations_require_tenant() {
    tokio_test::block_on(async {
        let repo = PgSessionRepository::new(unreachable_executor());

        assert_missing(repo.save_session(&Session::new("s1", "helper")).await);
        assert_missing(repo.load_session("s1").await);
        assert_missing(repo.list_sessions().await);
        assert_missing(repo.delete_session("s1").await);
        assert_missing(repo.restore_session("s1").await);
        assert_missing(repo.save_message(&Message::new("s1", MessageRole::User, "hi")).await);
        assert_missing(repo.load_messages("s1").await);
        assert_missing(repo.search_messages("hi", None, None).await);
        assert_missing(repo.stats().await);
    });
}

#[test]
fn test_other_stores_require_tenant() {
    tokio_test::block_on(async {
        let executor = unreachable_executor();
        let artifacts = PgArtifactRepository::new(executor.clone());
        let errors = PgErrorRepository::new(executor.clone());
        let results = PgResultRepository::new(executor);

        let artifact = Artifact::new("a1", "notes.txt", "/notes.txt", ArtifactSource::User, "text/plain", 1);
        assert_missing(artifacts.index(&artifact).await);
        assert_missing(artifacts.list(&ArtifactFilter::default()).await);
        assert_missing(artifacts.soft_delete("a1").await);

        assert_missing(errors.store("s1", "sql", "boom").await);
        assert_missing(errors.list(&ErrorFilter::default()).await);

        let data = TabularData::try_from(serde_json::json!([{"id": 1}])).unwrap();
        assert_missing(results.store("R1", &data).await);
        assert_missing(results.query("R1", None).await);
        assert_missing(results.delete("R1").await);
    });
}

#[test]
fn test_tenant_does_not_leak_into_spawned_tasks() {
    tokio_test::block_on(async {
        let repo = Arc::new(PgSessionRepository::new(unreachable_executor()));
        let tenant_id = TenantId::new("alice").unwrap();

        let handle = tenant::scope(tenant_id, async {
            let repo = repo.clone();
            tokio::spawn(async move { repo.list_sessions().await })
        })
        .await;

        assert_missing(handle.await.unwrap());
    });
}
