//! Global configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

/// Keyring service name used for every stored credential.
const KEYRING_SERVICE: &str = "agent-relay";

/// Execution backend used by the orchestrator.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Supervised background processes on this host.
    Local,
    /// Managed jobs submitted to a Kubernetes cluster.
    Cluster,
}

/// Work source polled by the orchestrator.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// A single JSON array file.
    File,
    /// A watched directory of JSON array files.
    Directory,
    /// `GitHub` issues carrying a label.
    Github,
    /// Jira issues matched by a JQL query.
    Jira,
}

/// Orchestrator loop settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct OrchestratorConfig {
    /// Execution backend.
    pub mode: ExecutionMode,
    /// Work source kind.
    pub source: SourceKind,
    /// Seconds between polls.
    pub interval_seconds: u64,
    /// Failed spawns tolerated per work item before it is abandoned.
    pub max_spawn_attempts: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Local,
            source: SourceKind::File,
            interval_seconds: 60,
            max_spawn_attempts: 3,
        }
    }
}

/// Settings for the concrete work sources.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct SourceConfig {
    /// JSON array file read by the `file` source.
    pub work_file: Option<PathBuf>,
    /// Directory watched by the `directory` source.
    pub watch_dir: Option<PathBuf>,
    /// `owner/name` of the repository whose issues are polled.
    pub github_repo: Option<String>,
    /// Base URL of the `GitHub` REST API.
    pub github_api_url: String,
    /// Label selecting agent-ready issues.
    pub label: String,
    /// Base URL of the Jira instance.
    pub jira_url: Option<String>,
    /// Account used for Jira basic auth.
    pub jira_username: Option<String>,
    /// Explicit JQL; derived from `label` when absent.
    pub jira_query: Option<String>,
    /// Workflow transition applied to a delivered Jira ticket.
    pub jira_done_transition: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            work_file: None,
            watch_dir: None,
            github_repo: None,
            github_api_url: "https://api.github.com".into(),
            label: "agent".into(),
            jira_url: None,
            jira_username: None,
            jira_query: None,
            jira_done_transition: "Done".into(),
        }
    }
}

/// Agent job defaults and the program that runs a session.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct AgentConfig {
    /// Program started for detached sessions.
    pub command: String,
    /// Arguments passed before the job handoff.
    pub args: Vec<String>,
    /// Default container image for cluster jobs.
    pub image: String,
    /// Default action proposer provider.
    pub provider: String,
    /// Default action proposer model.
    pub model: String,
    /// Maximum concurrently running local sessions.
    pub max_agents: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "agent-relay".into(),
            args: vec!["run".into()],
            image: "ghcr.io/softwaresalt/agent-relay:latest".into(),
            provider: "openrouter".into(),
            model: "openrouter/auto".into(),
            max_agents: 1,
        }
    }
}

/// Kubernetes job submission settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct ClusterConfig {
    /// Namespace jobs are created in.
    pub namespace: String,
    /// Image pull policy for job containers.
    pub image_pull_policy: String,
    /// API server base URL.
    pub api_url: String,
    /// Optional secret exposed to job containers through `envFrom`.
    pub secret_name: Option<String>,
    /// Seconds a finished job is kept before garbage collection.
    pub ttl_seconds_after_finished: u32,
    /// Directory holding the service-account token and CA bundle.
    pub service_account_dir: PathBuf,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            namespace: "default".into(),
            image_pull_policy: "Always".into(),
            api_url: "https://kubernetes.default.svc".into(),
            secret_name: None,
            ttl_seconds_after_finished: 3600,
            service_account_dir: PathBuf::from("/var/run/secrets/kubernetes.io/serviceaccount"),
        }
    }
}

/// Session loop budgets and timeouts.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct SessionConfig {
    /// Worker iterations allowed before the session gives up.
    pub max_iterations: u32,
    /// Advisory manager review every N iterations; 0 disables.
    pub manager_frequency: u32,
    /// Consecutive no-progress iterations that trip the circuit breaker;
    /// 0 disables.
    pub stall_threshold: u32,
    /// Proposer calls allowed per QA or manager review.
    pub review_max_turns: u32,
    /// Merge attempts before finalization fails.
    pub max_finalize_attempts: u32,
    /// Timeout for one proposer call.
    pub proposer_timeout_seconds: u64,
    /// Timeout for one proposed shell command.
    pub command_timeout_seconds: u64,
    /// Pause after a failed proposer call.
    pub iteration_backoff_ms: u64,
    /// Conversation turns kept in the progress file and sent to the proposer.
    pub max_history: usize,
    /// Grace period between SIGTERM and SIGKILL when stopping a session.
    pub stop_grace_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            manager_frequency: 5,
            stall_threshold: 3,
            review_max_turns: 4,
            max_finalize_attempts: 3,
            proposer_timeout_seconds: 300,
            command_timeout_seconds: 600,
            iteration_backoff_ms: 2000,
            max_history: 40,
            stop_grace_seconds: 2,
        }
    }
}

/// Git identity and branch policies.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct GitConfig {
    /// Author name for automated commits.
    pub user_name: String,
    /// Author email for automated commits.
    pub user_email: String,
    /// Append a timestamp to feature branch names.
    pub unique_branch_names: bool,
    /// Merge into the base branch on sign-off instead of only pushing.
    pub auto_merge: bool,
    /// Timeout for `git clone`.
    pub clone_timeout_seconds: u64,
    /// Timeout for every other git command.
    pub op_timeout_seconds: u64,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            user_name: "agent-relay".into(),
            user_email: "agent-relay@users.noreply.github.com".into(),
            unique_branch_names: false,
            auto_merge: true,
            clone_timeout_seconds: 600,
            op_timeout_seconds: 60,
        }
    }
}

/// HTTP action proposer settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case", default)]
pub struct ProposerConfig {
    /// Chat completions base URL; derived from the provider when absent.
    pub base_url: Option<String>,
    /// Upper bound on generated tokens per call.
    pub max_tokens: Option<u32>,
}

/// Session lifecycle event a notification can be sent for.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotifyEvent {
    /// A session began work on an item.
    Start,
    /// The Manager signed the project off.
    SignedOff,
    /// The work was merged or pushed.
    Complete,
    /// The session failed or ran out of budget.
    Failure,
    /// A blocker was raised.
    Blocked,
}

impl NotifyEvent {
    /// Every event, the default subscription.
    pub const ALL: [Self; 5] = [
        Self::Start,
        Self::SignedOff,
        Self::Complete,
        Self::Failure,
        Self::Blocked,
    ];
}

/// Chat webhooks that receive session notifications.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct NotifyConfig {
    /// Slack incoming webhook URL.
    pub slack_webhook_url: Option<String>,
    /// Discord webhook URL.
    pub discord_webhook_url: Option<String>,
    /// Events to send.
    pub events: Vec<NotifyEvent>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            slack_webhook_url: None,
            discord_webhook_url: None,
            events: NotifyEvent::ALL.to_vec(),
        }
    }
}

/// Secrets resolved at runtime from the OS keychain or environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Token for the `GitHub` API and HTTPS clones.
    pub github_token: Option<String>,
    /// Jira API token.
    pub jira_api_token: Option<String>,
    /// Action proposer API key.
    pub proposer_api_key: Option<String>,
}

fn default_retention_days() -> u32 {
    30
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory holding the database, session logs, and local workspaces.
    pub state_dir: PathBuf,
    /// Orchestrator loop settings.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Work source settings.
    #[serde(default)]
    pub source: SourceConfig,
    /// Agent job defaults.
    #[serde(default)]
    pub agent: AgentConfig,
    /// Cluster backend settings.
    #[serde(default)]
    pub cluster: ClusterConfig,
    /// Session budgets.
    #[serde(default)]
    pub session: SessionConfig,
    /// Git identity and branch policies.
    #[serde(default)]
    pub git: GitConfig,
    /// Action proposer settings.
    #[serde(default)]
    pub proposer: ProposerConfig,
    /// Chat notifications.
    #[serde(default)]
    pub notifications: NotifyConfig,
    /// Days an archived session record is kept.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Runtime credentials (never read from TOML).
    #[serde(skip)]
    pub credentials: Credentials,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Default configuration rooted at `state_dir`, for runs without a
    /// config file such as cluster jobs.
    #[must_use]
    pub fn with_state_dir(state_dir: PathBuf) -> Self {
        Self {
            state_dir,
            orchestrator: OrchestratorConfig::default(),
            source: SourceConfig::default(),
            agent: AgentConfig::default(),
            cluster: ClusterConfig::default(),
            session: SessionConfig::default(),
            git: GitConfig::default(),
            proposer: ProposerConfig::default(),
            notifications: NotifyConfig::default(),
            retention_days: default_retention_days(),
            credentials: Credentials::default(),
        }
    }

    /// Path of the shared `SQLite` database.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.state_dir.join("relay.db")
    }

    /// Directory holding job files and logs of detached sessions.
    #[must_use]
    pub fn sessions_dir(&self) -> PathBuf {
        self.state_dir.join("sessions")
    }

    /// Directory holding workspaces created by the local spawner.
    #[must_use]
    pub fn workspaces_dir(&self) -> PathBuf {
        self.state_dir.join("workspaces")
    }

    /// Poll interval of the orchestrator loop.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.orchestrator.interval_seconds)
    }

    /// Create the state directory tree if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a directory cannot be created.
    pub fn ensure_state_dirs(&self) -> Result<()> {
        for dir in [self.state_dir.clone(), self.sessions_dir(), self.workspaces_dir()] {
            fs::create_dir_all(&dir).map_err(|err| {
                AppError::Config(format!("cannot create {}: {err}", dir.display()))
            })?;
        }
        Ok(())
    }

    /// Validate the settings the selected work source and mode depend on.
    ///
    /// Called after command-line overrides are applied, since those may
    /// change the source or mode.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first missing setting.
    pub fn validate_orchestrator(&self) -> Result<()> {
        if self.orchestrator.interval_seconds == 0 {
            return Err(AppError::Config(
                "orchestrator.interval_seconds must be greater than zero".into(),
            ));
        }
        if self.orchestrator.max_spawn_attempts == 0 {
            return Err(AppError::Config(
                "orchestrator.max_spawn_attempts must be greater than zero".into(),
            ));
        }
        match self.orchestrator.source {
            SourceKind::File if self.source.work_file.is_none() => Err(AppError::Config(
                "source.work_file is required for the file source".into(),
            )),
            SourceKind::Directory if self.source.watch_dir.is_none() => Err(AppError::Config(
                "source.watch_dir is required for the directory source".into(),
            )),
            SourceKind::Github => match self.source.github_repo.as_deref() {
                Some(repo) if repo.split_once('/').is_some_and(|(o, n)| !o.is_empty() && !n.is_empty()) => Ok(()),
                _ => Err(AppError::Config(
                    "source.github_repo must be set as owner/name".into(),
                )),
            },
            SourceKind::Jira if self.source.jira_url.is_none() || self.source.jira_username.is_none() => {
                Err(AppError::Config(
                    "source.jira_url and source.jira_username are required for the jira source"
                        .into(),
                ))
            }
            _ => Ok(()),
        }
    }

    /// Load the credentials the configured work source requires.
    ///
    /// The `GitHub` token is optional for the other sources and is used for
    /// authenticated clones when present.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a credential required by the selected
    /// source is missing from both the keychain and the environment.
    pub async fn load_orchestrator_credentials(&mut self) -> Result<()> {
        match self.orchestrator.source {
            SourceKind::Github => {
                self.credentials.github_token =
                    Some(load_credential("github_token", "GITHUB_TOKEN").await?);
            }
            SourceKind::Jira => {
                self.credentials.jira_api_token =
                    Some(load_credential("jira_api_token", "JIRA_API_TOKEN").await?);
            }
            SourceKind::File | SourceKind::Directory => {
                self.credentials.github_token =
                    load_optional_credential("github_token", "GITHUB_TOKEN").await;
            }
        }
        Ok(())
    }

    /// Load the credentials an agent session needs.
    ///
    /// Source tokens are optional here; without them the session skips
    /// status reporting. The proposer key is mandatory unless the provider is a local
    /// `ollama` endpoint.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the proposer key is required but missing.
    pub async fn load_session_credentials(&mut self, provider: &str) -> Result<()> {
        self.credentials.github_token =
            load_optional_credential("github_token", "GITHUB_TOKEN").await;
        if matches!(self.orchestrator.source, SourceKind::Jira) {
            self.credentials.jira_api_token =
                load_optional_credential("jira_api_token", "JIRA_API_TOKEN").await;
        }
        self.credentials.proposer_api_key = if provider == "ollama" {
            load_optional_credential("proposer_api_key", "RELAY_API_KEY").await
        } else {
            Some(load_credential("proposer_api_key", "RELAY_API_KEY").await?)
        };
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.state_dir.as_os_str().is_empty() {
            return Err(AppError::Config("state_dir must not be empty".into()));
        }
        if self.agent.max_agents == 0 {
            return Err(AppError::Config(
                "agent.max_agents must be greater than zero".into(),
            ));
        }
        if self.agent.command.trim().is_empty() {
            return Err(AppError::Config("agent.command must not be empty".into()));
        }
        let webhooks = [
            &self.notifications.slack_webhook_url,
            &self.notifications.discord_webhook_url,
        ];
        for url in webhooks.into_iter().flatten() {
            if !url.starts_with("https://") && !url.starts_with("http://") {
                return Err(AppError::Config(format!(
                    "notification webhook must be an http(s) URL, got {url}"
                )));
            }
        }
        if self.session.max_iterations == 0 {
            return Err(AppError::Config(
                "session.max_iterations must be greater than zero".into(),
            ));
        }
        if self.session.review_max_turns == 0 {
            return Err(AppError::Config(
                "session.review_max_turns must be greater than zero".into(),
            ));
        }
        if self.session.max_finalize_attempts == 0 {
            return Err(AppError::Config(
                "session.max_finalize_attempts must be greater than zero".into(),
            ));
        }
        if self.git.clone_timeout_seconds == 0 || self.git.op_timeout_seconds == 0 {
            return Err(AppError::Config("git timeouts must be greater than zero".into()));
        }
        Ok(())
    }
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<String> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(value),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    match env::var(env_key) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(AppError::Config(format!(
            "credential {keyring_key} not found in keychain or {env_key} env var"
        ))),
    }
}

async fn load_optional_credential(keyring_key: &str, env_key: &str) -> Option<String> {
    load_credential(keyring_key, env_key).await.ok()
}
