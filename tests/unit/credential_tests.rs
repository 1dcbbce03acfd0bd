//! Credential loading falls back to environment variables when the OS
//! keychain has no entry for the `agent-relay` service.
//!
//! These tests mutate process-global env vars and run serially.

use std::path::PathBuf;

use agent_relay::config::{GlobalConfig, SourceKind};
use agent_relay::AppError;

const VARS: [&str; 3] = ["GITHUB_TOKEN", "JIRA_API_TOKEN", "RELAY_API_KEY"];

fn clear_env() {
    for var in VARS {
        std::env::remove_var(var);
    }
}

fn config(source: SourceKind) -> GlobalConfig {
    let mut config = GlobalConfig::with_state_dir(PathBuf::from("/tmp/relay"));
    config.orchestrator.source = source;
    config
}

#[tokio::test]
#[serial_test::serial]
async fn github_source_reads_token_from_env() {
    clear_env();
    std::env::set_var("GITHUB_TOKEN", "ghp_from_env");

    let mut config = config(SourceKind::Github);
    config.load_orchestrator_credentials().await.expect("loaded");

    assert_eq!(config.credentials.github_token.as_deref(), Some("ghp_from_env"));
    clear_env();
}

#[tokio::test]
#[serial_test::serial]
async fn missing_required_token_names_both_sources() {
    clear_env();

    let mut config = config(SourceKind::Jira);
    let err = config
        .load_orchestrator_credentials()
        .await
        .expect_err("no jira token");

    assert!(matches!(err, AppError::Config(_)));
    let msg = err.to_string();
    assert!(msg.contains("keychain"), "{msg}");
    assert!(msg.contains("JIRA_API_TOKEN"), "{msg}");
}

#[tokio::test]
#[serial_test::serial]
async fn file_source_treats_github_token_as_optional() {
    clear_env();

    let mut config = config(SourceKind::File);
    config.load_orchestrator_credentials().await.expect("optional");

    assert!(config.credentials.github_token.is_none());
}

#[tokio::test]
#[serial_test::serial]
async fn empty_env_value_counts_as_missing() {
    clear_env();
    std::env::set_var("RELAY_API_KEY", "");

    let mut config = config(SourceKind::File);
    assert!(config.load_session_credentials("openrouter").await.is_err());
    clear_env();
}

#[tokio::test]
#[serial_test::serial]
async fn session_credentials_need_a_proposer_key_except_for_ollama() {
    clear_env();

    let mut config = config(SourceKind::File);
    config
        .load_session_credentials("ollama")
        .await
        .expect("local provider needs no key");
    assert!(config.credentials.proposer_api_key.is_none());

    std::env::set_var("RELAY_API_KEY", "sk-test");
    config
        .load_session_credentials("openrouter")
        .await
        .expect("key from env");
    assert_eq!(config.credentials.proposer_api_key.as_deref(), Some("sk-test"));
    clear_env();
}
