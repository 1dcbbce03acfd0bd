//! Agent progress file kept in the workspace for resumption.

use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::edits::write_atomic;
use super::state::Phase;
use crate::models::action::Turn;
use crate::{AppError, Result};

/// File name of the progress file, relative to the workspace.
pub const STATE_FILE: &str = ".agent_state.json";

/// Directory for relay-private workspace data such as snapshots.
pub const RELAY_DIR: &str = ".relay";

/// Persisted loop state of one session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentProgress {
    /// Work item this file belongs to.
    pub work_item_id: String,
    /// Feature branch chosen by the first run.
    #[serde(default)]
    pub feature_branch: Option<String>,
    /// Worker iterations used.
    pub iteration: u32,
    /// Last phase.
    pub phase: Phase,
    /// Circuit breaker streak.
    #[serde(default)]
    pub no_progress_streak: u32,
    /// Failed merge attempts.
    #[serde(default)]
    pub finalize_attempts: u32,
    /// Bounded conversation, oldest first.
    #[serde(default)]
    pub history: Vec<Turn>,
    /// Last write.
    pub updated_at: DateTime<Utc>,
}

impl AgentProgress {
    /// Fresh progress for a work item.
    #[must_use]
    pub fn new(work_item_id: impl Into<String>) -> Self {
        Self {
            work_item_id: work_item_id.into(),
            feature_branch: None,
            iteration: 0,
            phase: Phase::Initializing,
            no_progress_streak: 0,
            finalize_attempts: 0,
            history: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Append a turn, dropping the oldest beyond `max_history`.
    pub fn push_turn(&mut self, turn: Turn, max_history: usize) {
        self.history.push(turn);
        if self.history.len() > max_history {
            let excess = self.history.len() - max_history;
            self.history.drain(..excess);
        }
    }

    /// Read the progress file of `workspace`, if there is one.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file exists but cannot be read or parsed.
    pub fn load(workspace: &Path) -> Result<Option<Self>> {
        let path = workspace.join(STATE_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|err| AppError::Io(format!("corrupt {STATE_FILE}: {err}")))
    }

    /// Write the progress file atomically.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if serialization or the write fails.
    pub fn save(&mut self, workspace: &Path) -> Result<()> {
        self.updated_at = Utc::now();
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(&workspace.join(STATE_FILE), &json)
    }
}

/// Keep relay bookkeeping out of commits via `.git/info/exclude`.
pub fn exclude_from_git(workspace: &Path) {
    let exclude = workspace.join(".git").join("info").join("exclude");
    let existing = fs::read_to_string(&exclude).unwrap_or_default();
    let missing: Vec<String> = [STATE_FILE.to_owned(), format!("{RELAY_DIR}/")]
        .into_iter()
        .filter(|entry| !existing.lines().any(|line| line.trim() == entry))
        .collect();
    if missing.is_empty() {
        return;
    }

    let result = exclude
        .parent()
        .map_or(Ok(()), fs::create_dir_all)
        .and_then(|()| {
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&exclude)?;
            if !existing.is_empty() && !existing.ends_with('\n') {
                writeln!(file)?;
            }
            for entry in &missing {
                writeln!(file, "{entry}")?;
            }
            Ok(())
        });
    if let Err(err) = result {
        warn!(%err, "failed to update git exclude file");
    }
}
