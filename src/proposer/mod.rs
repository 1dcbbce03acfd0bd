//! Action proposer capability.
//!
//! The session asks an [`ActionProposer`] for the next step given its role
//! and the accumulated conversation. Roles are a closed enum dispatched
//! through this one contract; [`http::HttpProposer`] is the production
//! implementation backed by an OpenAI-compatible chat completions API.

pub mod http;
pub mod parse;
pub mod prompts;

use crate::models::action::{Proposal, Role, Turn};
use crate::models::work_item::WorkItem;
use crate::{BoxFuture, Result};

/// Everything the proposer sees for one turn.
#[derive(Debug, Clone, Copy)]
pub struct ProposalContext<'a> {
    /// Role to play.
    pub role: Role,
    /// Work being delivered.
    pub work_item: &'a WorkItem,
    /// Current worker iteration.
    pub iteration: u32,
    /// Conversation so far, oldest first.
    pub history: &'a [Turn],
}

/// Source of next actions and completion claims.
pub trait ActionProposer: Send + Sync {
    /// Propose the next step for `ctx.role`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Proposer` if the backend call fails; the session
    /// treats this as a failed iteration.
    fn propose<'a>(&'a self, ctx: ProposalContext<'a>) -> BoxFuture<'a, Result<Proposal>>;
}
