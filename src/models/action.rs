//! Roles, proposed actions, and the conversation they accumulate.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::signal::Producer;

/// Logical role the proposer is asked to play.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Implements the work item.
    Worker,
    /// Independently verifies a completion claim.
    Qa,
    /// Reviews progress and authorizes delivery.
    Manager,
}

impl Role {
    /// Lowercase display name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Worker => "worker",
            Self::Qa => "qa",
            Self::Manager => "manager",
        }
    }

    /// Signal producer identity for writes made by this role.
    #[must_use]
    pub fn producer(self) -> Producer {
        match self {
            Self::Worker => Producer::Worker,
            Self::Qa => Producer::Qa,
            Self::Manager => Producer::Manager,
        }
    }
}

/// A concrete step the session applies to the workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// Replace a file's full content.
    WriteFile {
        /// Workspace-relative path.
        path: String,
        /// New content.
        content: String,
    },
    /// Apply a unified diff to an existing file.
    Patch {
        /// Workspace-relative path.
        path: String,
        /// Unified diff text.
        diff: String,
    },
    /// Run a shell script in the workspace.
    Command {
        /// Script passed to `sh -c`.
        script: String,
    },
    /// Nothing to do this turn.
    NoOp,
}

impl Action {
    /// Short label used in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::WriteFile { .. } => "write_file",
            Self::Patch { .. } => "patch",
            Self::Command { .. } => "command",
            Self::NoOp => "no_op",
        }
    }

    /// Content hash used to recognise an action repeated verbatim.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.kind().as_bytes());
        match self {
            Self::WriteFile { path, content } => {
                hasher.update(path.as_bytes());
                hasher.update([0]);
                hasher.update(content.as_bytes());
            }
            Self::Patch { path, diff } => {
                hasher.update(path.as_bytes());
                hasher.update([0]);
                hasher.update(diff.as_bytes());
            }
            Self::Command { script } => hasher.update(script.trim().as_bytes()),
            Self::NoOp => {}
        }
        format!("{:x}", hasher.finalize())
    }
}

/// A structured claim instead of an action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "claim", rename_all = "snake_case")]
pub enum Claim {
    /// The Worker states the work is done.
    Completed,
    /// A reviewer approves.
    Approved,
    /// A reviewer rejects with feedback.
    Rejected {
        /// Why the work is not acceptable yet.
        reason: String,
    },
    /// The Worker cannot make progress without help.
    Blocked {
        /// What is in the way.
        reason: String,
    },
}

/// What the proposer returned for one turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Proposal {
    /// Apply an action.
    Action(Action),
    /// Make a claim.
    Claim(Claim),
}

/// Kind of a conversation entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    /// What a role proposed.
    Proposal,
    /// What happened when it was applied.
    Observation,
    /// Reviewer feedback or a manager directive.
    Feedback,
}

/// One entry of the accumulated session conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Turn {
    /// Role the entry belongs to.
    pub role: Role,
    /// Entry kind.
    pub kind: TurnKind,
    /// Text content.
    pub content: String,
}

impl Turn {
    /// Construct a conversation entry.
    #[must_use]
    pub fn new(role: Role, kind: TurnKind, content: impl Into<String>) -> Self {
        Self {
            role,
            kind,
            content: content.into(),
        }
    }
}
