//! Session loop phases.

use serde::{Deserialize, Serialize};

/// Phase of the session state machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Preparing the workspace.
    Initializing,
    /// Worker turns.
    Iterating,
    /// The Worker claimed completion; reviews are pending.
    AwaitingReview,
    /// Signed off; merging.
    Finalizing,
    /// Delivered.
    Completed,
    /// Ended by an error or the circuit breaker.
    Failed,
    /// Iteration budget used up.
    MaxIterationsReached,
}

impl Phase {
    /// Whether the session has ended.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::MaxIterationsReached
        )
    }

    /// Determine whether a transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Initializing, Self::Iterating | Self::Failed)
                | (
                    Self::Iterating,
                    Self::AwaitingReview
                        | Self::Finalizing
                        | Self::Failed
                        | Self::MaxIterationsReached
                )
                | (
                    Self::AwaitingReview,
                    Self::Iterating
                        | Self::Finalizing
                        | Self::Failed
                        | Self::MaxIterationsReached
                )
                | (
                    Self::Finalizing,
                    Self::Completed | Self::Iterating | Self::Failed
                )
        )
    }
}
