//! Integration tests against `WorkerManager`'s public surface. These
//! exercise `external`-mode workers exclusively — no real worker binary is
//! spawned, so the tests don't depend on what `claude --print ...`
//! actually does, only on the manager's own bookkeeping.

use std::sync::Arc;
use worker_manager::{ManagerConfig, SpawnMode, SpawnRequest, TaskRequest, WorkerManager, WorkerState};

fn manager(max_workers: usize) -> Arc<WorkerManager> {
    let config = ManagerConfig { max_workers, ..ManagerConfig::default() };
    Arc::new(WorkerManager::new(config, Arc::new(message_bus::MessageBus::new()), None, None, None))
}

#[tokio::test]
async fn spawn_external_worker_is_ready_immediately() {
    let mgr = manager(5);
    let req = SpawnRequest {
        handle: "w1".to_string(),
        spawn_mode: Some(SpawnMode::External),
        ..Default::default()
    };
    let summary = mgr.spawn_worker(req).await.unwrap();
    assert_eq!(summary.state, WorkerState::Ready);
    assert_eq!(mgr.get_worker_count(), 1);
}

#[tokio::test]
async fn duplicate_handle_is_rejected() {
    let mgr = manager(5);
    let req = SpawnRequest { handle: "dup".to_string(), spawn_mode: Some(SpawnMode::External), ..Default::default() };
    mgr.spawn_worker(req.clone()).await.unwrap();
    let err = mgr.spawn_worker(req).await.unwrap_err();
    assert!(err.to_string().contains("already in use"));
}

#[tokio::test]
async fn max_workers_enforced() {
    let mgr = manager(1);
    let req1 = SpawnRequest { handle: "a".to_string(), spawn_mode: Some(SpawnMode::External), ..Default::default() };
    let req2 = SpawnRequest { handle: "b".to_string(), spawn_mode: Some(SpawnMode::External), ..Default::default() };
    mgr.spawn_worker(req1).await.unwrap();
    let err = mgr.spawn_worker(req2).await.unwrap_err();
    assert!(err.to_string().contains("max workers"));
}

#[tokio::test]
async fn dismiss_by_handle_removes_worker() {
    let mgr = manager(5);
    let req = SpawnRequest { handle: "gone".to_string(), spawn_mode: Some(SpawnMode::External), ..Default::default() };
    mgr.spawn_worker(req).await.unwrap();
    assert_eq!(mgr.get_worker_count(), 1);

    mgr.dismiss_worker_by_handle("gone", true).await;
    assert_eq!(mgr.get_worker_count(), 0);
    assert!(mgr.get_worker_by_handle("gone").is_none());
}

#[tokio::test]
async fn register_external_worker_has_no_stdin_and_send_fails() {
    let mgr = manager(5);
    let summary = mgr.register_external_worker("ext1", "fleet", "/tmp", None).await;
    assert_eq!(summary.spawn_mode, SpawnMode::External);

    let sent = mgr.send_to_worker(&summary.id, "hello").await;
    assert!(!sent);
}

#[tokio::test]
async fn inject_worker_output_updates_recent_output_and_heartbeat() {
    let mgr = manager(5);
    let summary = mgr.register_external_worker("ext2", "fleet", "/tmp", None).await;
    let before = mgr.get_worker(&summary.id).unwrap().last_heartbeat;

    let event = log_parser::Event {
        event_type: log_parser::EventType::Assistant,
        subtype: None,
        session_id: None,
        text: Some("doing work".to_string()),
        duration_ms: None,
        is_error: false,
        timestamp: 0,
    };
    mgr.inject_worker_output("ext2", event).await;

    let after = mgr.get_worker(&summary.id).unwrap();
    assert!(after.last_heartbeat >= before);
    assert_eq!(mgr.get_worker_output(&summary.id), vec!["doing work".to_string()]);
}

#[tokio::test]
async fn inject_worker_output_on_unknown_handle_is_a_no_op() {
    let mgr = manager(5);
    let event = log_parser::Event {
        event_type: log_parser::EventType::Assistant,
        subtype: None,
        session_id: None,
        text: Some("ignored".to_string()),
        duration_ms: None,
        is_error: false,
        timestamp: 0,
    };
    mgr.inject_worker_output("ghost", event).await;
    assert_eq!(mgr.get_worker_count(), 0);
}

#[tokio::test]
async fn health_stats_count_registered_workers_as_healthy() {
    let mgr = manager(5);
    mgr.register_external_worker("h1", "fleet", "/tmp", None).await;
    mgr.register_external_worker("h2", "fleet", "/tmp", None).await;

    let stats = mgr.get_health_stats();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.healthy, 2);
}

#[tokio::test]
async fn dismiss_all_clears_every_worker() {
    let mgr = manager(5);
    mgr.register_external_worker("a", "fleet", "/tmp", None).await;
    mgr.register_external_worker("b", "fleet", "/tmp", None).await;
    assert_eq!(mgr.get_worker_count(), 2);

    mgr.dismiss_all().await;
    assert_eq!(mgr.get_worker_count(), 0);
}

#[tokio::test]
async fn routing_recommendation_is_always_some() {
    let mgr = manager(5);
    let task = TaskRequest {
        id: "t1".to_string(),
        title: "Refactor the whole auth subsystem".to_string(),
        description: Some("cross-cutting change across many files".to_string()),
    };
    let rec = mgr.get_routing_recommendation(&task).unwrap();
    assert_eq!(rec.complexity, "complex");
}

#[tokio::test]
async fn deliver_task_to_unknown_worker_returns_false() {
    let mgr = manager(5);
    let task = TaskRequest { id: "t1".to_string(), title: "do a thing".to_string(), description: None };
    let delivered = mgr.deliver_task_to_worker("no-such-id", &task).await;
    assert!(!delivered);
}
