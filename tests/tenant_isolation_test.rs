mod helpers;

use agentstore::adapters::postgres::PgSessionRepository;
use agentstore::domain::DbResultExt;
use agentstore::{DomainError, Message, MessageRole, Session, SessionRepository};

use helpers::database::{as_tenant, setup_test_db, teardown_test_db, tenant_executor, unique_id, unique_tenant};

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_tenant_cannot_see_other_tenants_session() {
    let pool = setup_test_db().await;
    let repo = PgSessionRepository::new(tenant_executor(&pool));
    let alice = unique_tenant("alice");
    let bob = unique_tenant("bob");
    let session_id = unique_id("s");

    as_tenant(&alice, repo.save_session(&Session::new(&session_id, "helper")))
        .await
        .expect("alice saves her session");

    let seen_by_bob = as_tenant(&bob, repo.load_session(&session_id)).await.unwrap();
    assert!(seen_by_bob.is_none(), "bob must not see alice's session");

    let bob_ids = as_tenant(&bob, repo.list_sessions()).await.unwrap();
    assert!(!bob_ids.contains(&session_id));

    let seen_by_alice = as_tenant(&alice, repo.load_session(&session_id))
        .await
        .unwrap()
        .expect("alice sees her own session");
    assert_eq!(seen_by_alice.session.user_id, alice.as_str());

    teardown_test_db(pool).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_user_id_on_session_is_ignored() {
    let pool = setup_test_db().await;
    let repo = PgSessionRepository::new(tenant_executor(&pool));
    let alice = unique_tenant("alice");
    let session_id = unique_id("s");

    let mut session = Session::new(&session_id, "helper");
    session.user_id = "someone-else".to_string();
    as_tenant(&alice, repo.save_session(&session)).await.unwrap();

    let loaded = as_tenant(&alice, repo.load_session(&session_id)).await.unwrap().unwrap();
    assert_eq!(loaded.session.user_id, alice.as_str());

    teardown_test_db(pool).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_forged_tenant_insert_is_policy_violation() {
    let pool = setup_test_db().await;
    let executor = tenant_executor(&pool);
    let alice = unique_tenant("alice");
    let session_id = unique_id("s");

    let result = as_tenant(&alice, async {
        let mut tx = executor.begin().await?;
        sqlx::query("INSERT INTO sessions (id, user_id, agent_id) VALUES ($1, 'bob', 'helper')")
            .bind(&session_id)
            .execute(tx.conn())
            .await
            .db_context("forge session")?;
        tx.commit().await
    })
    .await;

    match result {
        Err(DomainError::PolicyViolation { operation, .. }) => assert_eq!(operation, "forge session"),
        other => panic!("expected PolicyViolation, got {other:?}"),
    }

    teardown_test_db(pool).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_cross_tenant_delete_and_restore_are_no_ops() {
    let pool = setup_test_db().await;
    let repo = PgSessionRepository::new(tenant_executor(&pool));
    let alice = unique_tenant("alice");
    let bob = unique_tenant("bob");
    let session_id = unique_id("s");

    as_tenant(&alice, repo.save_session(&Session::new(&session_id, "helper")))
        .await
        .unwrap();

    as_tenant(&bob, repo.delete_session(&session_id))
        .await
        .expect("zero-row delete is not an error");
    assert!(as_tenant(&alice, repo.load_session(&session_id)).await.unwrap().is_some());

    as_tenant(&alice, repo.delete_session(&session_id)).await.unwrap();
    as_tenant(&bob, repo.restore_session(&session_id))
        .await
        .expect("zero-row restore is not an error");
    assert!(as_tenant(&alice, repo.load_session(&session_id)).await.unwrap().is_none());

    teardown_test_db(pool).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_message_into_other_tenants_session_is_not_found() {
    let pool = setup_test_db().await;
    let repo = PgSessionRepository::new(tenant_executor(&pool));
    let alice = unique_tenant("alice");
    let bob = unique_tenant("bob");
    let session_id = unique_id("s");

    as_tenant(&alice, repo.save_session(&Session::new(&session_id, "helper")))
        .await
        .unwrap();

    let err = as_tenant(&bob, repo.save_message(&Message::new(&session_id, MessageRole::User, "hi")))
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "unexpected error {err:?}");

    let messages = as_tenant(&alice, repo.load_messages(&session_id)).await.unwrap();
    assert!(messages.is_empty());

    teardown_test_db(pool).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_tenants_do_not_leak() {
    let pool = setup_test_db().await;
    let repo = PgSessionRepository::new(tenant_executor(&pool));
    let tenants: Vec<_> = (0..8).map(|i| unique_tenant(&format!("t{i}"))).collect();

    let writes = tenants.iter().map(|t| {
        let repo = repo.clone();
        let t = t.clone();
        tokio::spawn(async move {
            let id = unique_id("s");
            as_tenant(&t, repo.save_session(&Session::new(&id, "helper"))).await.unwrap();
            (t, id)
        })
    });
    let written: Vec<_> = futures::future::join_all(writes)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    for (tenant, own_id) in &written {
        let ids = as_tenant(tenant, repo.list_sessions()).await.unwrap();
        assert_eq!(ids, vec![own_id.clone()], "tenant {tenant} saw foreign sessions");
    }

    teardown_test_db(pool).await;
}
