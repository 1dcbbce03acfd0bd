//! Detached session registry with real child processes.

#![cfg(unix)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use agent_relay::config::GlobalConfig;
use agent_relay::models::job::JobConfig;
use agent_relay::models::session::SessionStatus;
use agent_relay::models::work_item::WorkItem;
use agent_relay::orchestrator::child_monitor::poll_children;
use agent_relay::orchestrator::{LocalSpawner, SessionManager, Spawner};
use agent_relay::persistence::db;
use agent_relay::AppError;

async fn manager(dir: &Path, script: &str) -> (SessionManager, GlobalConfig) {
    let config = GlobalConfig::with_state_dir(dir.to_path_buf());
    config.ensure_state_dirs().expect("state dirs");
    let db = db::connect_memory().await.expect("db connect");
    let manager = SessionManager::with_command(
        Arc::new(db),
        config.sessions_dir(),
        "sh".into(),
        vec!["-c".into(), script.into()],
        Duration::from_millis(500),
    );
    (manager, config)
}

fn job(config: &GlobalConfig, id: &str) -> JobConfig {
    let item = WorkItem::new(id, "detached work");
    JobConfig::resolve(&item, config, config.workspaces_dir().join(id))
}

async fn wait_for_exit(manager: &SessionManager, name: &str) {
    for _ in 0..100 {
        poll_children(&manager.children(), manager.repo()).await;
        if manager.status(name).await.expect("status").status != SessionStatus::Running {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("session {name} did not exit");
}

#[tokio::test]
async fn started_session_is_registered_and_stoppable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (manager, config) = manager(dir.path(), "sleep 30").await;

    let state = manager.start("alpha", &job(&config, "alpha")).await.expect("start");
    assert_eq!(state.status, SessionStatus::Running);
    assert!(state.pid.is_some());
    assert!(manager.job_path("alpha").exists());
    assert_eq!(manager.count_running().await.expect("count"), 1);

    let stopped = manager.stop("alpha").await.expect("stop");
    assert_eq!(stopped.status, SessionStatus::Stopped);
    assert!(stopped.archived);
    assert!(manager.list(false).await.expect("list").is_empty());
    assert_eq!(manager.list(true).await.expect("list").len(), 1);
}

#[tokio::test]
async fn duplicate_live_session_is_refused() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (manager, config) = manager(dir.path(), "sleep 30").await;

    manager.start("alpha", &job(&config, "alpha")).await.expect("start");
    let err = manager
        .start("alpha", &job(&config, "alpha"))
        .await
        .expect_err("duplicate");
    assert!(matches!(err, AppError::AlreadyExists(_)));

    manager.stop("alpha").await.expect("stop");
}

#[tokio::test]
async fn exit_codes_map_to_registry_outcomes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cases = [
        ("clean", "exit 0", SessionStatus::Completed, None),
        ("budget", "exit 3", SessionStatus::Failed, Some("maximum iterations reached")),
        ("stall", "exit 4", SessionStatus::Failed, Some("circuit breaker tripped")),
        ("broken", "exit 1", SessionStatus::Failed, Some("exited with code 1")),
    ];

    for (name, script, status, error) in cases {
        let (manager, config) = manager(&dir.path().join(name), script).await;
        manager.start(name, &job(&config, name)).await.expect("start");
        wait_for_exit(&manager, name).await;

        let state = manager.status(name).await.expect("status");
        assert_eq!(state.status, status, "{name}");
        assert_eq!(state.error.as_deref(), error, "{name}");
        assert!(state.ended_at.is_some(), "{name}");
    }
}

#[tokio::test]
async fn logs_capture_session_output() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (manager, config) = manager(dir.path(), "echo one; echo two; echo three").await;

    manager.start("talk", &job(&config, "talk")).await.expect("start");
    wait_for_exit(&manager, "talk").await;

    let tail = manager.logs("talk", 2).await.expect("logs");
    assert_eq!(tail.lines().collect::<Vec<_>>(), vec!["two", "three"]);
}

#[tokio::test]
async fn invalid_names_and_unknown_sessions_are_errors() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (manager, config) = manager(dir.path(), "exit 0").await;

    let err = manager
        .start("../evil", &job(&config, "evil"))
        .await
        .expect_err("bad name");
    assert!(matches!(err, AppError::Config(_)));

    let err = manager.status("ghost").await.expect_err("unknown");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn local_spawner_respects_max_agents() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (manager, config) = manager(dir.path(), "sleep 30").await;
    let config = Arc::new(config);
    let spawner = LocalSpawner::new(manager.clone(), Arc::clone(&config));

    let first = WorkItem::new("ITEM-1", "first");
    let second = WorkItem::new("ITEM-2", "second");

    spawner.spawn(&first).await.expect("first spawn");
    spawner.spawn(&first).await.expect("already running is not an error");
    let err = spawner.spawn(&second).await.expect_err("no free slot");
    assert!(matches!(err, AppError::Capacity(_)));

    let name = first.sanitized_id();
    assert!(name.starts_with("item-1-"), "{name}");
    assert!(manager.is_running(&name).await.expect("running"));
    assert!(config.workspaces_dir().join(&name).is_dir());

    spawner.cleanup(&first).await.expect("cleanup");
    assert!(!manager.is_running(&name).await.expect("stopped"));
    assert!(!config.workspaces_dir().join(&name).exists());
}

#[tokio::test]
async fn work_item_env_reaches_the_session_process() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (manager, config) = manager(
        dir.path(),
        r#"echo "marker=$RELAY_TEST_MARKER"; test -f "$RELAY_JOB_FILE" && echo job-file"#,
    )
    .await;

    let mut job = job(&config, "envy");
    job.work_item
        .env
        .insert("RELAY_TEST_MARKER".into(), "present".into());
    job.work_item
        .env
        .insert("RELAY_JOB_FILE".into(), "/nonexistent".into());
    manager.start("envy", &job).await.expect("start");
    wait_for_exit(&manager, "envy").await;

    let out = manager.logs("envy", 10).await.expect("logs");
    assert!(out.contains("marker=present"), "{out}");
    assert!(out.contains("job-file"), "item env cannot hide the job file: {out}");
}
