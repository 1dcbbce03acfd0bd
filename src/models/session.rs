//! Registry model for detached sessions.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle phase of a detached session process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Process started and not yet observed to exit.
    Running,
    /// Session finished its work.
    Completed,
    /// Session exited with an error or vanished.
    Failed,
    /// Session was stopped by an operator.
    Stopped,
}

impl SessionStatus {
    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Registry entry for one detached session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionState {
    /// Unique session name.
    pub name: String,
    /// OS process identifier.
    pub pid: Option<u32>,
    /// Work item the session is delivering.
    pub work_item_id: String,
    /// Workspace the session operates on.
    pub workspace: PathBuf,
    /// Combined stdout/stderr log.
    pub log_path: PathBuf,
    /// Current lifecycle phase.
    pub status: SessionStatus,
    /// Failure description for `Failed` sessions.
    pub error: Option<String>,
    /// Start timestamp.
    pub started_at: DateTime<Utc>,
    /// Time a terminal phase was recorded.
    pub ended_at: Option<DateTime<Utc>>,
    /// Hidden from listings after an explicit stop or cleanup.
    pub archived: bool,
}

impl SessionState {
    /// Construct a running entry.
    #[must_use]
    pub fn running(
        name: String,
        pid: Option<u32>,
        work_item_id: String,
        workspace: PathBuf,
        log_path: PathBuf,
    ) -> Self {
        Self {
            name,
            pid,
            work_item_id,
            workspace,
            log_path,
            status: SessionStatus::Running,
            error: None,
            started_at: Utc::now(),
            ended_at: None,
            archived: false,
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        matches!(
            (self.status, next),
            (
                SessionStatus::Running,
                SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Stopped
            )
        )
    }
}
