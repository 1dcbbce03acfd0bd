//! Turns free-form proposer replies into typed proposals.

use regex::Regex;

use crate::models::action::{Action, Claim, Proposal, Role};
use crate::{AppError, Result};

/// Compiled patterns for the reply protocol.
#[derive(Debug, Clone)]
pub struct ResponseParser {
    fence: Regex,
    status: Regex,
    blocked: Regex,
    verdict: Regex,
}

impl ResponseParser {
    /// Compile the reply patterns.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a pattern fails to compile.
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|err| AppError::Config(format!("invalid reply pattern: {err}")))
        };
        Ok(Self {
            fence: compile(r"(?s)```([^\n`]*)\n(.*?)```")?,
            status: compile(r"(?mi)^\s*STATUS:\s*COMPLETED\s*$")?,
            blocked: compile(r"(?mi)^\s*STATUS:\s*BLOCKED\b[ \t:\-]*(.*)$")?,
            verdict: compile(r"(?mi)^\s*VERDICT:\s*(APPROVED|REJECTED)\b[\s:\-]*(.*)$")?,
        })
    }

    /// Interpret a reply for `role`.
    ///
    /// Workers act before claiming: an action block wins over a completion
    /// line. Reviewers are the opposite: a verdict ends the review even if
    /// the reply also holds a command.
    #[must_use]
    pub fn parse(&self, role: Role, reply: &str) -> Proposal {
        match role {
            Role::Worker => {
                if let Some(action) = self.first_action(reply) {
                    Proposal::Action(action)
                } else if self.status.is_match(reply) {
                    Proposal::Claim(Claim::Completed)
                } else if let Some(caps) = self.blocked.captures(reply) {
                    let reason = caps.get(1).map_or("", |m| m.as_str()).trim();
                    Proposal::Claim(Claim::Blocked {
                        reason: if reason.is_empty() {
                            "no reason given".into()
                        } else {
                            reason.to_owned()
                        },
                    })
                } else {
                    Proposal::Action(Action::NoOp)
                }
            }
            Role::Qa | Role::Manager => {
                if let Some(claim) = self.verdict(reply) {
                    Proposal::Claim(claim)
                } else {
                    Proposal::Action(self.first_action(reply).unwrap_or(Action::NoOp))
                }
            }
        }
    }

    fn verdict(&self, reply: &str) -> Option<Claim> {
        let caps = self.verdict.captures(reply)?;
        let word = caps.get(1)?.as_str();
        if word.eq_ignore_ascii_case("APPROVED") {
            Some(Claim::Approved)
        } else {
            let reason = caps.get(2).map_or("", |m| m.as_str()).trim();
            Some(Claim::Rejected {
                reason: if reason.is_empty() {
                    "no reason given".into()
                } else {
                    reason.to_owned()
                },
            })
        }
    }

    fn first_action(&self, reply: &str) -> Option<Action> {
        self.fence.captures_iter(reply).find_map(|caps| {
            let info = caps.get(1).map_or("", |m| m.as_str()).trim();
            let body = caps.get(2).map_or("", |m| m.as_str());
            block_action(info, body)
        })
    }
}

fn block_action(info: &str, body: &str) -> Option<Action> {
    if let Some(path) = info.strip_prefix("file:") {
        let path = path.trim();
        return (!path.is_empty()).then(|| Action::WriteFile {
            path: path.to_owned(),
            content: body.to_owned(),
        });
    }
    if let Some(path) = info.strip_prefix("diff:").or_else(|| info.strip_prefix("patch:")) {
        let path = path.trim();
        return (!path.is_empty()).then(|| Action::Patch {
            path: path.to_owned(),
            diff: body.to_owned(),
        });
    }
    match info {
        "bash" | "sh" | "shell" => {
            let script = body.trim();
            (!script.is_empty()).then(|| Action::Command {
                script: script.to_owned(),
            })
        }
        _ => None,
    }
}
