use std::path::PathBuf;

use agent_relay::config::GlobalConfig;
use agent_relay::models::action::{Role, Turn, TurnKind};
use agent_relay::models::job::JobConfig;
use agent_relay::models::signal::Producer;
use agent_relay::models::work_item::{sanitize_name, unique_name, WorkItem};
use agent_relay::orchestrator::session_manager::validate_session_name;
use agent_relay::orchestrator::spawner::session_name;
use agent_relay::AppError;

#[test]
fn names_are_sanitized_for_processes_and_dns() {
    assert_eq!(sanitize_name("PROJ-12"), "proj-12");
    assert_eq!(sanitize_name("  Fix: login/logout!! "), "fix-login-logout");
    assert_eq!(sanitize_name("--a__b--"), "a-b");
    assert_eq!(sanitize_name("***"), "");
}

#[test]
fn ids_that_sanitize_alike_keep_distinct_names() {
    let slash = WorkItem::new("T/1", "x").sanitized_id();
    let dash = WorkItem::new("t-1", "x").sanitized_id();
    let upper = WorkItem::new("T-1", "x").sanitized_id();
    assert_eq!(dash, "t-1");
    assert!(slash.starts_with("t-1-"), "{slash}");
    assert_ne!(slash, dash);
    assert_ne!(slash, upper);
    assert_ne!(upper, dash);
    assert_eq!(slash, WorkItem::new("T/1", "y").sanitized_id(), "stable");

    assert_eq!(unique_name("***", 63), "");
    let capped = unique_name(&"x".repeat(80), 20);
    assert_eq!(capped.len(), 20);
    assert!(capped.starts_with("xxxxxxxxxxx-"), "{capped}");
}

#[test]
fn session_names_come_from_item_ids() {
    assert_eq!(
        session_name(&WorkItem::new("gh-42", "x")).expect("usable"),
        "gh-42"
    );
    assert!(matches!(
        session_name(&WorkItem::new("!!!", "x")),
        Err(AppError::Spawn(_))
    ));
}

#[test]
fn session_name_validation() {
    validate_session_name("proj-12").expect("valid");
    for bad in ["", "  ", "a/b", "a\\b", "..", "x..y"] {
        assert!(
            matches!(validate_session_name(bad), Err(AppError::Config(_))),
            "{bad:?}"
        );
    }
}

#[test]
fn blank_repo_url_counts_as_absent() {
    assert_eq!(WorkItem::new("a", "b").repo(), None);
    assert_eq!(WorkItem::new("a", "b").with_repo("   ").repo(), None);
    assert_eq!(
        WorkItem::new("a", "b").with_repo("https://x/y").repo(),
        Some("https://x/y")
    );
}

#[test]
fn work_item_json_needs_only_id_and_summary() {
    let item: WorkItem = serde_json::from_str(r#"{"id": "A-1", "summary": "s"}"#).expect("parse");
    assert_eq!(item, WorkItem::new("A-1", "s"));
    assert!(serde_json::from_str::<WorkItem>(r#"{"id": "A-1"}"#).is_err());
}

#[test]
fn job_resolution_prefers_item_overrides() {
    let config = GlobalConfig::with_state_dir(PathBuf::from("/tmp/relay"));
    let mut item = WorkItem::new("A-1", "s").with_epic("EPIC-1");
    item.model = Some("custom-model".into());

    let job = JobConfig::resolve(&item, &config, PathBuf::from("/work/a-1"));

    assert_eq!(job.project_id, "A-1");
    assert_eq!(job.model, "custom-model");
    assert_eq!(job.provider, config.agent.provider);
    assert_eq!(job.image, config.agent.image);
    assert!(job.session_name.is_none());
    assert_eq!(job.settings.max_iterations, config.session.max_iterations);
    assert_eq!(job.settings.auto_merge, config.git.auto_merge);
    assert_eq!(job.work_item.epic_id.as_deref(), Some("EPIC-1"));
}

#[test]
fn job_files_load_and_reject_garbage() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = GlobalConfig::with_state_dir(dir.path().to_path_buf());
    let job = JobConfig::resolve(&WorkItem::new("A-1", "s"), &config, dir.path().join("ws"));

    let path = dir.path().join("a.job.json");
    std::fs::write(&path, job.to_json().expect("json")).expect("write");
    assert_eq!(JobConfig::load(&path).expect("load"), job);

    assert!(matches!(
        JobConfig::from_json("{}"),
        Err(AppError::Config(_))
    ));
    assert!(matches!(
        JobConfig::load(&dir.path().join("absent.json")),
        Err(AppError::Config(_))
    ));
}

#[test]
fn roles_map_to_producers() {
    assert_eq!(Role::Worker.producer(), Producer::Worker);
    assert_eq!(Role::Qa.producer(), Producer::Qa);
    assert_eq!(Role::Manager.producer(), Producer::Manager);
    assert_eq!(Role::Qa.as_str(), "qa");
}

#[test]
fn turns_serialize_in_snake_case() {
    let turn = Turn::new(Role::Manager, TurnKind::Feedback, "ship it");
    let value = serde_json::to_value(&turn).expect("json");
    assert_eq!(value["role"], "manager");
    assert_eq!(value["kind"], "feedback");
}

#[test]
fn error_classification() {
    assert!(AppError::MaxIterations(20).is_budget_exhausted());
    assert!(AppError::Stalled(3).is_budget_exhausted());
    assert!(!AppError::Git("x".into()).is_budget_exhausted());
    assert!(AppError::Cancelled.is_cancelled());
    assert_eq!(
        AppError::MaxIterations(20).to_string(),
        "maximum iterations reached (20)"
    );
    assert_eq!(
        AppError::Protocol("no".into()).to_string(),
        "protocol violation: no"
    );
}

#[cfg(unix)]
#[test]
fn exit_statuses_map_to_registry_outcomes() {
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    use agent_relay::models::session::SessionStatus;
    use agent_relay::orchestrator::child_monitor::exit_outcome;

    assert_eq!(
        exit_outcome(Some(ExitStatus::from_raw(0))),
        (SessionStatus::Completed, None)
    );
    assert_eq!(
        exit_outcome(Some(ExitStatus::from_raw(3 << 8))),
        (SessionStatus::Failed, Some("maximum iterations reached".into()))
    );
    assert_eq!(
        exit_outcome(Some(ExitStatus::from_raw(4 << 8))),
        (SessionStatus::Failed, Some("circuit breaker tripped".into()))
    );
    assert_eq!(
        exit_outcome(Some(ExitStatus::from_raw(9))),
        (SessionStatus::Failed, Some("terminated by signal".into()))
    );
    assert_eq!(exit_outcome(None).0, SessionStatus::Failed);
}
