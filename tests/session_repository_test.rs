mod helpers;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use agentstore::adapters::postgres::PgSessionRepository;
use agentstore::{
    DomainError, MemorySnapshot, Message, MessageRole, Session, SessionCleanupHook, SessionRepository, ToolExecution,
};
use async_trait::async_trait;
use serde_json::json;

use helpers::database::{as_tenant, setup_test_db, teardown_test_db, tenant_executor, unique_id, unique_tenant};

#[derive(Default)]
struct RecordingHook {
    deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl SessionCleanupHook for RecordingHook {
    async fn on_session_deleted(&self, session_id: &str) -> anyhow::Result<()> {
        self.deleted.lock().unwrap().push(session_id.to_string());
        Ok(())
    }
}

struct FailingHook {
    calls: AtomicUsize,
}

#[async_trait]
impl SessionCleanupHook for FailingHook {
    async fn on_session_deleted(&self, _session_id: &str) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("cleanup backend unavailable")
    }
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_save_and_load_session_with_messages() {
    let pool = setup_test_db().await;
    let repo = PgSessionRepository::new(tenant_executor(&pool));
    let alice = unique_tenant("alice");
    let session_id = unique_id("s");

    as_tenant(&alice, async {
        let session = Session::new(&session_id, "helper").with_context("topic", json!("billing"));
        repo.save_session(&session).await.unwrap();

        let first = repo
            .save_message(&Message::new(&session_id, MessageRole::User, "how much do I owe?"))
            .await
            .unwrap();
        let second = repo
            .save_message(
                &Message::new(&session_id, MessageRole::Assistant, "You owe nothing.").with_usage(12, 0.002),
            )
            .await
            .unwrap();
        assert!(second > first);

        let loaded = repo.load_session(&session_id).await.unwrap().expect("session exists");
        assert_eq!(loaded.session.agent_id, "helper");
        assert_eq!(loaded.session.context["topic"], json!("billing"));
        let roles: Vec<MessageRole> = loaded.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![MessageRole::User, MessageRole::Assistant]);
        assert_eq!(loaded.messages[1].token_count, 12);
        assert!(loaded.messages.iter().all(|m| m.user_id == alice.as_str()));
    })
    .await;

    teardown_test_db(pool).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_soft_delete_and_restore_cycle() {
    let pool = setup_test_db().await;
    let repo = PgSessionRepository::new(tenant_executor(&pool));
    let alice = unique_tenant("alice");
    let session_id = unique_id("s");

    as_tenant(&alice, async {
        repo.save_session(&Session::new(&session_id, "helper")).await.unwrap();
        repo.save_message(&Message::new(&session_id, MessageRole::User, "hello"))
            .await
            .unwrap();

        repo.delete_session(&session_id).await.unwrap();
        assert!(repo.load_session(&session_id).await.unwrap().is_none());
        assert!(!repo.list_sessions().await.unwrap().contains(&session_id));
        assert!(repo.load_messages(&session_id).await.unwrap().is_empty());

        let err = repo
            .save_message(&Message::new(&session_id, MessageRole::User, "still there?"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        repo.restore_session(&session_id).await.unwrap();
        let restored = repo.load_session(&session_id).await.unwrap().expect("restored");
        assert_eq!(restored.messages.len(), 1);
    })
    .await;

    teardown_test_db(pool).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_cleanup_hooks_run_once_per_effective_delete() {
    let pool = setup_test_db().await;
    let repo = PgSessionRepository::new(tenant_executor(&pool));
    let recording = Arc::new(RecordingHook::default());
    let failing = Arc::new(FailingHook { calls: AtomicUsize::new(0) });
    repo.register_cleanup_hook(failing.clone());
    repo.register_cleanup_hook(recording.clone());

    let alice = unique_tenant("alice");
    let bob = unique_tenant("bob");
    let session_id = unique_id("s");

    as_tenant(&alice, repo.save_session(&Session::new(&session_id, "helper")))
        .await
        .unwrap();

    as_tenant(&bob, repo.delete_session(&session_id)).await.unwrap();
    assert!(recording.deleted.lock().unwrap().is_empty(), "no hook for a zero-row delete");

    as_tenant(&alice, repo.delete_session(&session_id)).await.unwrap();
    assert_eq!(*recording.deleted.lock().unwrap(), vec![session_id.clone()]);
    assert_eq!(failing.calls.load(Ordering::SeqCst), 1);

    as_tenant(&alice, repo.delete_session(&session_id)).await.unwrap();
    assert_eq!(recording.deleted.lock().unwrap().len(), 1, "already deleted");

    teardown_test_db(pool).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_agent_and_parent_session_queries() {
    let pool = setup_test_db().await;
    let repo = PgSessionRepository::new(tenant_executor(&pool));
    let alice = unique_tenant("alice");
    let parent_id = unique_id("parent");
    let child_id = unique_id("child");
    let agent = unique_id("researcher");

    as_tenant(&alice, async {
        repo.save_session(&Session::new(&parent_id, "planner")).await.unwrap();
        repo.save_session(&Session::new(&child_id, &agent).with_parent(&parent_id))
            .await
            .unwrap();

        repo.save_message(&Message::new(&parent_id, MessageRole::User, "plan the trip"))
            .await
            .unwrap();
        repo.save_message(&Message::new(&child_id, MessageRole::Assistant, "found three flights"))
            .await
            .unwrap();

        assert_eq!(repo.load_agent_sessions(&agent).await.unwrap(), vec![child_id.clone()]);

        let agent_messages = repo.load_messages_for_agent(&agent).await.unwrap();
        assert_eq!(agent_messages.len(), 1);
        assert_eq!(agent_messages[0].content, "found three flights");

        let inherited = repo.load_messages_from_parent_session(&child_id).await.unwrap();
        assert_eq!(inherited.len(), 1);
        assert_eq!(inherited[0].content, "plan the trip");

        assert!(repo.load_messages_from_parent_session(&parent_id).await.unwrap().is_empty());
    })
    .await;

    teardown_test_db(pool).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_full_text_search_is_tenant_scoped() {
    let pool = setup_test_db().await;
    let repo = PgSessionRepository::new(tenant_executor(&pool));
    let alice = unique_tenant("alice");
    let bob = unique_tenant("bob");
    let alice_session = unique_id("s");
    let bob_session = unique_id("s");
    let agent = unique_id("agent");

    as_tenant(&alice, async {
        repo.save_session(&Session::new(&alice_session, &agent)).await.unwrap();
        repo.save_message(&Message::new(&alice_session, MessageRole::User, "the quarterly invoice is overdue"))
            .await
            .unwrap();
        repo.save_message(&Message::new(&alice_session, MessageRole::User, "unrelated weather chat"))
            .await
            .unwrap();
    })
    .await;
    as_tenant(&bob, async {
        repo.save_session(&Session::new(&bob_session, &agent)).await.unwrap();
        repo.save_message(&Message::new(&bob_session, MessageRole::User, "bob's invoice was paid"))
            .await
            .unwrap();
    })
    .await;

    let hits = as_tenant(&alice, repo.search_messages("invoices", None, None)).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].session_id, alice_session);

    let scoped = as_tenant(&alice, repo.search_messages("invoice", Some(&bob_session), None))
        .await
        .unwrap();
    assert!(scoped.is_empty());

    let by_agent = as_tenant(&bob, repo.search_messages_by_agent(&agent, "invoice", Some(5)))
        .await
        .unwrap();
    assert_eq!(by_agent.len(), 1);
    assert_eq!(by_agent[0].session_id, bob_session);

    let blank = as_tenant(&alice, repo.search_messages("   ", None, None)).await.unwrap();
    assert!(blank.is_empty());

    teardown_test_db(pool).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_tool_executions_and_memory_snapshots() {
    let pool = setup_test_db().await;
    let repo = PgSessionRepository::new(tenant_executor(&pool));
    let alice = unique_tenant("alice");
    let bob = unique_tenant("bob");
    let session_id = unique_id("s");

    as_tenant(&alice, async {
        repo.save_session(&Session::new(&session_id, "helper")).await.unwrap();

        repo.save_tool_execution(
            &ToolExecution::succeeded(&session_id, "sql", json!({"q": "SELECT 1"}), json!([[1]])).with_duration_ms(8),
        )
        .await
        .unwrap();
        repo.save_tool_execution(&ToolExecution::failed(&session_id, "http", json!({}), "timeout"))
            .await
            .unwrap();

        let executions = repo.list_tool_executions(&session_id).await.unwrap();
        assert_eq!(executions.len(), 2);
        assert_eq!(executions[0].tool_name, "sql");
        assert_eq!(executions[0].execution_time_ms, 8);
        assert_eq!(executions[1].error.as_deref(), Some("timeout"));

        for (i, text) in ["first summary", "second summary", "third summary"].iter().enumerate() {
            let snapshot = MemorySnapshot::new(&session_id, "summary", *text, i32::try_from(i).unwrap());
            repo.save_memory_snapshot(&snapshot).await.unwrap();
        }
        repo.save_memory_snapshot(&MemorySnapshot::new(&session_id, "facts", "likes tea", 3))
            .await
            .unwrap();

        let all = repo.load_memory_snapshots(&session_id, "summary", None).await.unwrap();
        let contents: Vec<&str> = all.iter().map(|s| s.content.as_str()).collect();
        assert_eq!(contents, vec!["first summary", "second summary", "third summary"]);

        let capped = repo.load_memory_snapshots(&session_id, "summary", Some(2)).await.unwrap();
        assert_eq!(capped.len(), 2);

        let latest = repo.latest_memory_snapshot(&session_id, "summary").await.unwrap().unwrap();
        assert_eq!(latest.content, "third summary");
        assert!(repo.latest_memory_snapshot(&session_id, "plans").await.unwrap().is_none());
    })
    .await;

    as_tenant(&bob, async {
        assert!(repo.list_tool_executions(&session_id).await.unwrap().is_empty());
        assert!(repo.load_memory_snapshots(&session_id, "summary", None).await.unwrap().is_empty());
        assert!(repo.latest_memory_snapshot(&session_id, "summary").await.unwrap().is_none());

        let err = repo
            .save_memory_snapshot(&MemorySnapshot::new(&session_id, "summary", "planted", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound { entity: "session", .. }), "got {err:?}");
        let err = repo
            .save_tool_execution(&ToolExecution::failed(&session_id, "sql", json!({}), "planted"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound { entity: "session", .. }), "got {err:?}");
    })
    .await;

    as_tenant(&alice, async {
        assert_eq!(repo.list_tool_executions(&session_id).await.unwrap().len(), 2);
        let latest = repo.latest_memory_snapshot(&session_id, "summary").await.unwrap().unwrap();
        assert_eq!(latest.content, "third summary");
    })
    .await;

    teardown_test_db(pool).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_stats_cover_only_live_sessions_of_tenant() {
    let pool = setup_test_db().await;
    let repo = PgSessionRepository::new(tenant_executor(&pool));
    let alice = unique_tenant("alice");
    let bob = unique_tenant("bob");
    let live = unique_id("s");
    let deleted = unique_id("s");

    as_tenant(&alice, async {
        let mut session = Session::new(&live, "helper");
        session.record_usage(0.5, 100);
        repo.save_session(&session).await.unwrap();
        repo.save_message(&Message::new(&live, MessageRole::User, "hi")).await.unwrap();
        repo.save_tool_execution(&ToolExecution::succeeded(&live, "sql", json!({}), json!(null)))
            .await
            .unwrap();

        let mut gone = Session::new(&deleted, "helper");
        gone.record_usage(9.0, 9000);
        repo.save_session(&gone).await.unwrap();
        repo.delete_session(&deleted).await.unwrap();
    })
    .await;

    let stats = as_tenant(&alice, repo.stats()).await.unwrap();
    assert_eq!(stats.total_sessions, 1);
    assert_eq!(stats.total_messages, 1);
    assert_eq!(stats.total_tool_executions, 1);
    assert_eq!(stats.total_tokens, 100);
    assert!((stats.total_cost_usd - 0.5).abs() < 1e-9);

    let empty = as_tenant(&bob, repo.stats()).await.unwrap();
    assert_eq!(empty.total_sessions, 0);
    assert_eq!(empty.total_tokens, 0);

    teardown_test_db(pool).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_session_id_owned_by_other_tenant_cannot_be_taken_over() {
    let pool = setup_test_db().await;
    let repo = PgSessionRepository::new(tenant_executor(&pool));
    let alice = unique_tenant("alice");
    let bob = unique_tenant("bob");
    let session_id = unique_id("s");

    as_tenant(&alice, repo.save_session(&Session::new(&session_id, "helper")))
        .await
        .unwrap();

    let err = as_tenant(&bob, repo.save_session(&Session::new(&session_id, "intruder")))
        .await
        .unwrap_err();
    assert!(err.is_policy_violation(), "unexpected error {err:?}");

    let loaded = as_tenant(&alice, repo.load_session(&session_id)).await.unwrap().unwrap();
    assert_eq!(loaded.session.agent_id, "helper");

    teardown_test_db(pool).await;
}
