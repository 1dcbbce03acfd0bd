use std::path::PathBuf;
use std::time::Duration;

use agent_relay::config::{ExecutionMode, GlobalConfig, NotifyEvent, SourceKind};
use agent_relay::AppError;

#[test]
fn minimal_config_uses_defaults() {
    let config = GlobalConfig::from_toml_str(r#"state_dir = "/var/lib/relay""#).expect("valid");

    assert_eq!(config.state_dir, PathBuf::from("/var/lib/relay"));
    assert_eq!(config.orchestrator.mode, ExecutionMode::Local);
    assert_eq!(config.orchestrator.source, SourceKind::File);
    assert_eq!(config.poll_interval(), Duration::from_secs(60));
    assert_eq!(config.orchestrator.max_spawn_attempts, 3);
    assert_eq!(config.agent.max_agents, 1);
    assert_eq!(config.agent.provider, "openrouter");
    assert_eq!(config.session.max_iterations, 20);
    assert_eq!(config.session.manager_frequency, 5);
    assert_eq!(config.session.stall_threshold, 3);
    assert!(config.git.auto_merge);
    assert_eq!(config.retention_days, 30);
    assert!(config.credentials.github_token.is_none());
    assert_eq!(config.source.jira_done_transition, "Done");
    assert!(config.notifications.slack_webhook_url.is_none());
    assert_eq!(config.notifications.events, NotifyEvent::ALL.to_vec());
}

#[test]
fn state_paths_hang_off_state_dir() {
    let config = GlobalConfig::with_state_dir(PathBuf::from("/srv/relay"));

    assert_eq!(config.db_path(), PathBuf::from("/srv/relay/relay.db"));
    assert_eq!(config.sessions_dir(), PathBuf::from("/srv/relay/sessions"));
    assert_eq!(config.workspaces_dir(), PathBuf::from("/srv/relay/workspaces"));
}

#[test]
fn sections_override_defaults() {
    let raw = r#"
state_dir = "/tmp/relay"
retention_days = 7

[orchestrator]
mode = "cluster"
source = "github"
interval_seconds = 15

[source]
github_repo = "acme/web"
label = "bot"
jira_done_transition = "Resolve"

[session]
max_iterations = 5
manager_frequency = 0

[git]
auto_merge = false
"#;
    let config = GlobalConfig::from_toml_str(raw).expect("valid");

    assert_eq!(config.orchestrator.mode, ExecutionMode::Cluster);
    assert_eq!(config.orchestrator.source, SourceKind::Github);
    assert_eq!(config.poll_interval(), Duration::from_secs(15));
    assert_eq!(config.source.github_repo.as_deref(), Some("acme/web"));
    assert_eq!(config.source.label, "bot");
    assert_eq!(config.source.jira_done_transition, "Resolve");
    assert_eq!(config.session.max_iterations, 5);
    assert_eq!(config.session.manager_frequency, 0);
    assert!(!config.git.auto_merge);
    assert_eq!(config.retention_days, 7);
    config.validate_orchestrator().expect("github source is complete");
}

#[test]
fn missing_state_dir_is_rejected() {
    let err = GlobalConfig::from_toml_str("[agent]\nmax_agents = 2\n").expect_err("state_dir required");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn zero_budgets_are_rejected() {
    for section in [
        "[agent]\nmax_agents = 0",
        "[agent]\ncommand = \"  \"",
        "[session]\nmax_iterations = 0",
        "[session]\nreview_max_turns = 0",
        "[session]\nmax_finalize_attempts = 0",
        "[git]\nop_timeout_seconds = 0",
    ] {
        let raw = format!("state_dir = \"/tmp/relay\"\n{section}\n");
        let err = GlobalConfig::from_toml_str(&raw).expect_err(section);
        assert!(matches!(err, AppError::Config(_)), "{section}");
    }
}

#[test]
fn unknown_enum_values_are_rejected() {
    let raw = "state_dir = \"/tmp/relay\"\n[orchestrator]\nmode = \"swarm\"\n";
    assert!(matches!(
        GlobalConfig::from_toml_str(raw),
        Err(AppError::Config(_))
    ));
}

#[test]
fn orchestrator_validation_names_missing_source_settings() {
    let mut config = GlobalConfig::with_state_dir(PathBuf::from("/tmp/relay"));

    let err = config.validate_orchestrator().expect_err("no work file");
    assert!(err.to_string().contains("source.work_file"));

    config.source.work_file = Some(PathBuf::from("/tmp/work.json"));
    config.validate_orchestrator().expect("file source complete");

    config.orchestrator.source = SourceKind::Directory;
    assert!(config.validate_orchestrator().is_err());

    config.orchestrator.source = SourceKind::Github;
    config.source.github_repo = Some("no-slash".into());
    assert!(config.validate_orchestrator().is_err());

    config.orchestrator.source = SourceKind::Jira;
    config.source.jira_url = Some("https://acme.atlassian.net".into());
    assert!(config.validate_orchestrator().is_err(), "username missing");
    config.source.jira_username = Some("bot@acme.test".into());
    config.validate_orchestrator().expect("jira source complete");

    config.orchestrator.interval_seconds = 0;
    assert!(config.validate_orchestrator().is_err());
}

#[test]
fn load_from_path_reads_the_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "state_dir = \"/tmp/relay\"\n[agent]\nmax_agents = 4\n").expect("write");

    let config = GlobalConfig::load_from_path(&path).expect("load");
    assert_eq!(config.agent.max_agents, 4);

    let err = GlobalConfig::load_from_path(dir.path().join("absent.toml")).expect_err("missing");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn ensure_state_dirs_creates_the_tree() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = GlobalConfig::with_state_dir(dir.path().join("state"));

    config.ensure_state_dirs().expect("created");

    assert!(config.sessions_dir().is_dir());
    assert!(config.workspaces_dir().is_dir());
}

#[test]
fn notification_settings_are_parsed_and_checked() {
    let raw = r#"
state_dir = "/tmp/relay"

[notifications]
discord_webhook_url = "https://discord.test/api/webhooks/1/abc"
events = ["blocked", "failure"]
"#;
    let config = GlobalConfig::from_toml_str(raw).expect("valid");
    assert_eq!(
        config.notifications.discord_webhook_url.as_deref(),
        Some("https://discord.test/api/webhooks/1/abc")
    );
    assert_eq!(
        config.notifications.events,
        vec![NotifyEvent::Blocked, NotifyEvent::Failure]
    );

    let bad = r#"
state_dir = "/tmp/relay"

[notifications]
slack_webhook_url = "hooks.slack.test/services/x"
"#;
    let err = GlobalConfig::from_toml_str(bad).expect_err("not a url");
    assert!(matches!(err, AppError::Config(_)));
}
