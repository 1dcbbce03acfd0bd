//! Typed job description handed from a spawner to a session.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::work_item::WorkItem;
use crate::config::GlobalConfig;
use crate::{AppError, Result};

/// Environment variable naming a job file for a detached session.
pub const JOB_FILE_ENV: &str = "RELAY_JOB_FILE";

/// Environment variable carrying an inline JSON job for cluster jobs.
pub const JOB_INLINE_ENV: &str = "RELAY_JOB";

/// Environment variable naming the state directory when no config file is
/// given.
pub const STATE_DIR_ENV: &str = "RELAY_STATE_DIR";

/// Budgets and policies a session runs with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionSettings {
    /// Worker iteration budget.
    pub max_iterations: u32,
    /// Advisory manager review cadence; 0 disables.
    pub manager_frequency: u32,
    /// Circuit breaker threshold; 0 disables.
    pub stall_threshold: u32,
    /// Proposer calls per review.
    pub review_max_turns: u32,
    /// Merge attempts before finalization fails.
    pub max_finalize_attempts: u32,
    /// Proposer call timeout.
    pub proposer_timeout_seconds: u64,
    /// Shell command timeout.
    pub command_timeout_seconds: u64,
    /// Pause after a failed proposer call.
    pub iteration_backoff_ms: u64,
    /// Conversation turns retained.
    pub max_history: usize,
    /// Timestamp-suffixed feature branches.
    pub unique_branch_names: bool,
    /// Merge into the base branch on sign-off.
    pub auto_merge: bool,
}

impl SessionSettings {
    /// Derive settings from the global configuration.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        let session = &config.session;
        Self {
            max_iterations: session.max_iterations,
            manager_frequency: session.manager_frequency,
            stall_threshold: session.stall_threshold,
            review_max_turns: session.review_max_turns,
            max_finalize_attempts: session.max_finalize_attempts,
            proposer_timeout_seconds: session.proposer_timeout_seconds,
            command_timeout_seconds: session.command_timeout_seconds,
            iteration_backoff_ms: session.iteration_backoff_ms,
            max_history: session.max_history,
            unique_branch_names: config.git.unique_branch_names,
            auto_merge: config.git.auto_merge,
        }
    }
}

/// Everything a session needs to run one work item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct JobConfig {
    /// The work to deliver.
    pub work_item: WorkItem,
    /// Scope of the session's signals.
    pub project_id: String,
    /// Directory the repository lives in.
    pub workspace: PathBuf,
    /// Proposer provider.
    pub provider: String,
    /// Proposer model.
    pub model: String,
    /// Container image (cluster jobs).
    pub image: String,
    /// Registry name when started detached.
    #[serde(default)]
    pub session_name: Option<String>,
    /// Budgets and policies.
    pub settings: SessionSettings,
}

impl JobConfig {
    /// Build a job for `item`, filling unset overrides from the defaults.
    #[must_use]
    pub fn resolve(item: &WorkItem, config: &GlobalConfig, workspace: PathBuf) -> Self {
        Self {
            work_item: item.clone(),
            project_id: item.id.clone(),
            workspace,
            provider: item
                .provider
                .clone()
                .unwrap_or_else(|| config.agent.provider.clone()),
            model: item
                .model
                .clone()
                .unwrap_or_else(|| config.agent.model.clone()),
            image: item
                .image
                .clone()
                .unwrap_or_else(|| config.agent.image.clone()),
            session_name: None,
            settings: SessionSettings::from_config(config),
        }
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a JSON job description.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the JSON does not describe a job.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|err| AppError::Config(format!("invalid job: {err}")))
    }

    /// Read a job file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|err| {
            AppError::Config(format!("cannot read job file {}: {err}", path.display()))
        })?;
        Self::from_json(&raw)
    }
}
