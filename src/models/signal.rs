//! Signal model for role hand-offs.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AppError;

/// Signal names recognized by the session protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalName {
    /// The Worker claims the work is done.
    Completed,
    /// QA verified the Worker's claim.
    QaPassed,
    /// Final approval; unlocks the merge.
    ProjectSignedOff,
    /// Forces a QA review round.
    TriggerQa,
    /// Forces a manager review round.
    TriggerManager,
    /// Free-text report that the agent is stuck; routed to the Manager.
    Blocker,
}

impl SignalName {
    /// Every recognized signal name.
    pub const ALL: [Self; 6] = [
        Self::Completed,
        Self::QaPassed,
        Self::ProjectSignedOff,
        Self::TriggerQa,
        Self::TriggerManager,
        Self::Blocker,
    ];

    /// Stored key.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "COMPLETED",
            Self::QaPassed => "QA_PASSED",
            Self::ProjectSignedOff => "PROJECT_SIGNED_OFF",
            Self::TriggerQa => "TRIGGER_QA",
            Self::TriggerManager => "TRIGGER_MANAGER",
            Self::Blocker => "BLOCKER",
        }
    }

    /// Names an external caller may never write.
    #[must_use]
    pub fn is_privileged(self) -> bool {
        matches!(
            self,
            Self::ProjectSignedOff | Self::TriggerQa | Self::TriggerManager
        )
    }
}

impl fmt::Display for SignalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalName {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| AppError::NotFound(format!("unknown signal name: {s}")))
    }
}

/// Who wrote a signal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Producer {
    /// Worker role logic inside a session.
    Worker,
    /// QA role logic inside a session.
    Qa,
    /// Manager role logic inside a session.
    Manager,
    /// Explicit human action through the operator CLI.
    Operator,
    /// Unprivileged caller such as the bridge command.
    External,
}

impl Producer {
    /// Stored representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Worker => "worker",
            Self::Qa => "qa",
            Self::Manager => "manager",
            Self::Operator => "operator",
            Self::External => "external",
        }
    }

    /// Whether this producer may write (or clear) the named signal.
    #[must_use]
    pub fn may_write(self, name: &str) -> bool {
        let Ok(known) = name.parse::<SignalName>() else {
            return true;
        };
        match known {
            SignalName::ProjectSignedOff => matches!(self, Self::Manager | Self::Operator),
            SignalName::QaPassed => self != Self::Worker,
            SignalName::TriggerQa | SignalName::TriggerManager => self != Self::External,
            SignalName::Completed | SignalName::Blocker => true,
        }
    }
}

impl FromStr for Producer {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "worker" => Ok(Self::Worker),
            "qa" => Ok(Self::Qa),
            "manager" => Ok(Self::Manager),
            "operator" => Ok(Self::Operator),
            "external" => Ok(Self::External),
            other => Err(AppError::Db(format!("invalid signal producer: {other}"))),
        }
    }
}

/// A persisted, named fact scoped to one project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Signal {
    /// Owning project.
    pub project_id: String,
    /// Signal key.
    pub name: String,
    /// Stored value; see [`Signal::is_set`].
    pub value: String,
    /// Last writer.
    pub producer: Producer,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

impl Signal {
    /// Whether the value counts as a raised flag.
    #[must_use]
    pub fn is_set(&self) -> bool {
        value_is_set(&self.value)
    }
}

/// Truthiness rule shared by every signal value.
#[must_use]
pub fn value_is_set(value: &str) -> bool {
    let trimmed = value.trim();
    !trimmed.is_empty() && !trimmed.eq_ignore_ascii_case("false") && trimmed != "0"
}
