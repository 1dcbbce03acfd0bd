//! Role instructions and prompt rendering.

use std::fmt::Write as _;

use super::ProposalContext;
use crate::models::action::{Role, TurnKind};

const PROTOCOL: &str = "\
Respond with exactly one step. To run a shell command, reply with a fenced block tagged `bash`. \
To replace a file, reply with a fenced block tagged `file:<relative path>` holding the full new content. \
To patch a file, reply with a fenced block tagged `diff:<relative path>` holding a unified diff.";

const WORKER: &str = "\
You are the Worker. Implement the task in the repository checked out in your working directory, \
one step at a time. When the task is fully implemented and verified, reply with the line \
`STATUS: COMPLETED` and no fenced block. If you cannot continue without outside help, reply with \
`STATUS: BLOCKED <what you need>` instead.";

const QA: &str = "\
You are QA. The Worker claims the task is complete. Verify it independently: inspect the code and \
run the relevant builds and tests with `bash` blocks. You may not edit files. When done, reply with \
`VERDICT: APPROVED` or `VERDICT: REJECTED <reason>`.";

const MANAGER: &str = "\
You are the Manager. Review progress against the task and give direction. Address any blocker \
reported in the history first. You may run read-only `bash` commands. Finish with `VERDICT: APPROVED` if the work is ready to ship, otherwise \
`VERDICT: REJECTED <what must change>`.";

/// System prompt for a role.
#[must_use]
pub fn system_prompt(role: Role) -> String {
    let role_text = match role {
        Role::Worker => WORKER,
        Role::Qa => QA,
        Role::Manager => MANAGER,
    };
    format!("{role_text}\n\n{PROTOCOL}")
}

/// User prompt: the task followed by the conversation so far.
#[must_use]
pub fn render_user_prompt(ctx: &ProposalContext<'_>) -> String {
    let item = ctx.work_item;
    let mut out = format!("# Task {}\n{}\n", item.id, item.summary);
    if !item.description.trim().is_empty() {
        let _ = write!(out, "\n{}\n", item.description.trim());
    }
    let _ = write!(out, "\nIteration {}.\n", ctx.iteration);

    if !ctx.history.is_empty() {
        out.push_str("\n# History\n");
        for turn in ctx.history {
            let label = match turn.kind {
                TurnKind::Proposal => "proposed",
                TurnKind::Observation => "observed",
                TurnKind::Feedback => "feedback",
            };
            let _ = write!(out, "\n[{} {label}]\n{}\n", turn.role.as_str(), turn.content);
        }
    }
    out
}
