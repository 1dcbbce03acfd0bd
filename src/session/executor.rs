//! Applies proposed actions to the workspace.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::edits;
use crate::models::action::{Action, Role};
use crate::models::job::{JOB_FILE_ENV, JOB_INLINE_ENV, STATE_DIR_ENV};
use crate::{AppError, Result};

/// Characters of command output kept in an observation.
const OUTPUT_LIMIT: usize = 8000;

/// What applying one action did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    /// Fingerprint of the applied action.
    pub fingerprint: String,
    /// Whether the action changed anything or did real work.
    pub effective: bool,
    /// Text fed back into the conversation.
    pub observation: String,
}

/// One-line description of an action for the conversation log.
#[must_use]
pub fn describe(action: &Action) -> String {
    match action {
        Action::WriteFile { path, content } => {
            format!("write {path} ({} bytes)", content.len())
        }
        Action::Patch { path, diff } => format!("patch {path}\n{diff}"),
        Action::Command { script } => format!("run\n{script}"),
        Action::NoOp => "no action".into(),
    }
}

/// Runs actions inside one workspace.
#[derive(Debug, Clone)]
pub struct ActionExecutor {
    workspace: PathBuf,
    command_timeout: Duration,
}

impl ActionExecutor {
    /// Create an executor for `workspace`.
    #[must_use]
    pub fn new(workspace: PathBuf, command_timeout: Duration) -> Self {
        Self {
            workspace,
            command_timeout,
        }
    }

    /// Apply `action` on behalf of `role`.
    ///
    /// Failures of the action itself (a bad path, a patch that does not
    /// apply, a failing command) become an ineffective outcome with the
    /// error as observation; they do not abort the session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cancelled` if `cancel` fires while a command runs.
    pub async fn apply(
        &self,
        role: Role,
        action: &Action,
        cancel: &CancellationToken,
    ) -> Result<ActionOutcome> {
        let fingerprint = action.fingerprint();
        let (effective, observation) = match action {
            Action::NoOp => (false, "nothing was done".to_owned()),
            Action::WriteFile { .. } | Action::Patch { .. } if role != Role::Worker => (
                false,
                format!("the {} role may not edit files", role.as_str()),
            ),
            Action::WriteFile { path, content } => {
                edit_outcome(path, edits::write_file(&self.workspace, path, content))
            }
            Action::Patch { path, diff } => {
                edit_outcome(path, edits::apply_patch(&self.workspace, path, diff))
            }
            Action::Command { script } => self.run_command(script, cancel).await?,
        };
        Ok(ActionOutcome {
            fingerprint,
            effective,
            observation,
        })
    }

    /// Proposed commands never see the relay's own environment, so they
    /// cannot locate the shared signal database or the job description.
    async fn run_command(&self, script: &str, cancel: &CancellationToken) -> Result<(bool, String)> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(script)
            .current_dir(&self.workspace)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env_remove(STATE_DIR_ENV)
            .env_remove(JOB_FILE_ENV)
            .env_remove(JOB_INLINE_ENV)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(workspace = %self.workspace.display(), "running proposed command");
        let output = tokio::select! {
            () = cancel.cancelled() => return Err(AppError::Cancelled),
            result = tokio::time::timeout(self.command_timeout, cmd.output()) => result,
        };

        match output {
            Err(_) => Ok((
                false,
                format!(
                    "command timed out after {}s",
                    self.command_timeout.as_secs()
                ),
            )),
            Ok(Err(err)) => {
                warn!(%err, "failed to start proposed command");
                Ok((false, format!("command could not start: {err}")))
            }
            Ok(Ok(output)) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.trim().is_empty() {
                    text.push_str("\n[stderr]\n");
                    text.push_str(&stderr);
                }
                let status = output
                    .status
                    .code()
                    .map_or_else(|| "terminated by signal".to_owned(), |c| format!("exit {c}"));
                Ok((true, format!("{status}\n{}", tail(&text, OUTPUT_LIMIT))))
            }
        }
    }
}

fn edit_outcome(path: &str, result: Result<edits::EditSummary>) -> (bool, String) {
    match result {
        Ok(summary) if summary.changed => (true, format!("{path} updated")),
        Ok(_) => (false, format!("{path} already had that content")),
        Err(err) => (false, format!("{path} not changed: {err}")),
    }
}

fn tail(text: &str, limit: usize) -> String {
    let count = text.chars().count();
    if count <= limit {
        return text.to_owned();
    }
    let kept: String = text.chars().skip(count - limit).collect();
    format!("[output truncated]\n{kept}")
}
