use agent_relay::models::action::{Action, Claim, Proposal, Role, Turn, TurnKind};
use agent_relay::models::work_item::WorkItem;
use agent_relay::proposer::http::{provider_base_url, HttpProposer};
use agent_relay::proposer::parse::ResponseParser;
use agent_relay::proposer::prompts::{render_user_prompt, system_prompt};
use agent_relay::proposer::ProposalContext;
use agent_relay::AppError;

fn parser() -> ResponseParser {
    ResponseParser::new().expect("patterns compile")
}

#[test]
fn bash_block_becomes_a_command() {
    let reply = "Let me look around.\n```bash\nls -la\ncargo test\n```\n";
    assert_eq!(
        parser().parse(Role::Worker, reply),
        Proposal::Action(Action::Command {
            script: "ls -la\ncargo test".into()
        })
    );
}

#[test]
fn file_block_replaces_content_verbatim() {
    let reply = "```file: src/lib.rs\npub fn answer() -> u32 {\n    42\n}\n```";
    assert_eq!(
        parser().parse(Role::Worker, reply),
        Proposal::Action(Action::WriteFile {
            path: "src/lib.rs".into(),
            content: "pub fn answer() -> u32 {\n    42\n}\n".into()
        })
    );
}

#[test]
fn diff_block_becomes_a_patch() {
    let reply = "```diff:README.md\n--- a/README.md\n+++ b/README.md\n@@ -1 +1 @@\n-old\n+new\n```";
    match parser().parse(Role::Worker, reply) {
        Proposal::Action(Action::Patch { path, diff }) => {
            assert_eq!(path, "README.md");
            assert!(diff.starts_with("--- a/README.md"));
        }
        other => panic!("expected patch, got {other:?}"),
    }
}

#[test]
fn first_recognized_block_wins() {
    let reply = "```rust\nfn ignored() {}\n```\n```sh\necho first\n```\n```bash\necho second\n```";
    assert_eq!(
        parser().parse(Role::Worker, reply),
        Proposal::Action(Action::Command {
            script: "echo first".into()
        })
    );
}

#[test]
fn worker_acts_before_claiming() {
    let p = parser();
    assert_eq!(
        p.parse(Role::Worker, "All done.\nSTATUS: COMPLETED\n"),
        Proposal::Claim(Claim::Completed)
    );
    assert!(matches!(
        p.parse(Role::Worker, "STATUS: COMPLETED\n```bash\ncargo test\n```"),
        Proposal::Action(Action::Command { .. })
    ));
    assert_eq!(
        p.parse(Role::Worker, "thinking out loud"),
        Proposal::Action(Action::NoOp)
    );
}

#[test]
fn reviewer_verdicts() {
    let p = parser();
    assert_eq!(
        p.parse(Role::Qa, "Tests pass.\nVERDICT: APPROVED"),
        Proposal::Claim(Claim::Approved)
    );
    assert_eq!(
        p.parse(Role::Manager, "verdict: rejected - login still fails\n"),
        Proposal::Claim(Claim::Rejected {
            reason: "login still fails".into()
        })
    );
    assert_eq!(
        p.parse(Role::Qa, "VERDICT: REJECTED"),
        Proposal::Claim(Claim::Rejected {
            reason: "no reason given".into()
        })
    );
    assert_eq!(
        p.parse(Role::Qa, "```bash\ncargo test\n```\nVERDICT: APPROVED"),
        Proposal::Claim(Claim::Approved)
    );
    assert!(matches!(
        p.parse(Role::Qa, "```bash\ncargo test\n```"),
        Proposal::Action(Action::Command { .. })
    ));
}

#[test]
fn empty_blocks_are_ignored() {
    let p = parser();
    assert_eq!(
        p.parse(Role::Worker, "```bash\n   \n```"),
        Proposal::Action(Action::NoOp)
    );
    assert_eq!(
        p.parse(Role::Worker, "```file:\ncontent\n```"),
        Proposal::Action(Action::NoOp)
    );
}

#[test]
fn worker_can_report_being_blocked() {
    let p = parser();
    assert_eq!(
        p.parse(Role::Worker, "I tried.\nSTATUS: BLOCKED: missing API key for staging\n"),
        Proposal::Claim(Claim::Blocked {
            reason: "missing API key for staging".into()
        })
    );
    assert_eq!(
        p.parse(Role::Worker, "status: blocked"),
        Proposal::Claim(Claim::Blocked {
            reason: "no reason given".into()
        })
    );
    assert!(matches!(
        p.parse(Role::Worker, "STATUS: BLOCKED on nothing\n```bash\nls\n```"),
        Proposal::Action(Action::Command { .. })
    ));
}

#[test]
fn system_prompts_are_role_specific() {
    assert!(system_prompt(Role::Worker).contains("STATUS: COMPLETED"));
    assert!(system_prompt(Role::Worker).contains("STATUS: BLOCKED"));
    assert!(system_prompt(Role::Qa).contains("may not edit files"));
    assert!(system_prompt(Role::Manager).contains("VERDICT: APPROVED"));
    for role in [Role::Worker, Role::Qa, Role::Manager] {
        assert!(system_prompt(role).contains("`bash`"));
    }
}

#[test]
fn user_prompt_carries_task_and_history() {
    let item = WorkItem::new("PROJ-3", "Add a health endpoint")
        .with_description("Return 200 on /health.");
    let history = vec![
        Turn::new(Role::Worker, TurnKind::Proposal, "run\ncargo test"),
        Turn::new(Role::Worker, TurnKind::Observation, "exit 0"),
        Turn::new(Role::Qa, TurnKind::Feedback, "missing test"),
    ];
    let prompt = render_user_prompt(&ProposalContext {
        role: Role::Worker,
        work_item: &item,
        iteration: 4,
        history: &history,
    });

    assert!(prompt.starts_with("# Task PROJ-3\nAdd a health endpoint\n"));
    assert!(prompt.contains("Return 200 on /health."));
    assert!(prompt.contains("Iteration 4."));
    assert!(prompt.contains("[worker proposed]\nrun\ncargo test"));
    assert!(prompt.contains("[worker observed]\nexit 0"));
    assert!(prompt.contains("[qa feedback]\nmissing test"));
}

#[test]
fn user_prompt_without_history_has_no_history_section() {
    let item = WorkItem::new("PROJ-3", "Add a health endpoint");
    let prompt = render_user_prompt(&ProposalContext {
        role: Role::Worker,
        work_item: &item,
        iteration: 1,
        history: &[],
    });
    assert!(!prompt.contains("# History"));
}

#[test]
fn known_providers_have_base_urls() {
    assert_eq!(
        provider_base_url("openrouter"),
        Some("https://openrouter.ai/api/v1")
    );
    assert_eq!(provider_base_url("openai"), Some("https://api.openai.com/v1"));
    assert!(provider_base_url("ollama").is_some());
    assert!(provider_base_url("mystery").is_none());
}

#[test]
fn unknown_provider_needs_an_explicit_base_url() {
    let err = HttpProposer::new("mystery", "m", None, None, None).expect_err("no endpoint");
    assert!(matches!(err, AppError::Config(_)));

    HttpProposer::new("mystery", "m", Some("http://localhost:9000/v1"), None, Some(512))
        .expect("explicit endpoint");
}
