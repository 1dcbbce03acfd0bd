use std::time::Duration;

use agent_relay::models::action::{Action, Role};
use agent_relay::session::edits::{apply_patch, validate_workspace_path, write_file};
use agent_relay::session::executor::{describe, ActionExecutor};
use agent_relay::AppError;
use tokio_util::sync::CancellationToken;

#[test]
fn relative_paths_resolve_inside_the_workspace() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().canonicalize().expect("canonical");

    let path = validate_workspace_path(dir.path(), "src/./lib.rs").expect("valid");
    assert_eq!(path, root.join("src/lib.rs"));

    let path = validate_workspace_path(dir.path(), "src/../README.md").expect("valid");
    assert_eq!(path, root.join("README.md"));
}

#[test]
fn escapes_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    for bad in ["../outside.txt", "a/../../outside.txt", "/etc/passwd", "", ".git/config"] {
        let err = validate_workspace_path(dir.path(), bad).expect_err(bad);
        assert!(matches!(err, AppError::PathViolation(_)), "{bad:?}");
    }
}

#[test]
fn absolute_path_inside_the_root_is_accepted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().canonicalize().expect("canonical");

    let path = validate_workspace_path(dir.path(), root.join("notes.md")).expect("inside");
    assert_eq!(path, root.join("notes.md"));
}

#[cfg(unix)]
#[test]
fn symlink_escape_is_rejected() {
    let outside = tempfile::tempdir().expect("outside");
    let dir = tempfile::tempdir().expect("tempdir");
    std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).expect("symlink");
    std::fs::write(outside.path().join("secret"), "x").expect("write");

    let err = validate_workspace_path(dir.path(), "link/secret").expect_err("escape");
    assert!(matches!(err, AppError::PathViolation(_)));
}

#[test]
fn write_file_reports_whether_content_changed() {
    let dir = tempfile::tempdir().expect("tempdir");

    let first = write_file(dir.path(), "docs/notes.md", "hello\n").expect("write");
    assert!(first.changed);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("docs/notes.md")).expect("read"),
        "hello\n"
    );

    let second = write_file(dir.path(), "docs/notes.md", "hello\n").expect("write");
    assert!(!second.changed);
}

#[test]
fn patch_applies_and_keeps_crlf() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("a.txt"), "one\r\ntwo\r\nthree\r\n").expect("write");
    let diff = "--- a/a.txt\n+++ b/a.txt\n@@ -1,3 +1,3 @@\n one\n-two\n+TWO\n three\n";

    let summary = apply_patch(dir.path(), "a.txt", diff).expect("patch");

    assert!(summary.changed);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("a.txt")).expect("read"),
        "one\r\nTWO\r\nthree\r\n"
    );
}

#[test]
fn mismatched_patch_is_a_diff_error_and_leaves_the_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("a.txt"), "alpha\nbeta\n").expect("write");
    let diff = "--- a/a.txt\n+++ b/a.txt\n@@ -1,2 +1,2 @@\n alpha\n-gamma\n+delta\n";

    let err = apply_patch(dir.path(), "a.txt", diff).expect_err("context mismatch");
    assert!(matches!(err, AppError::Diff(_)));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("a.txt")).expect("read"),
        "alpha\nbeta\n"
    );

    let err = apply_patch(dir.path(), "missing.txt", diff).expect_err("no file");
    assert!(matches!(err, AppError::Diff(_)));
}

fn executor(dir: &tempfile::TempDir) -> ActionExecutor {
    ActionExecutor::new(dir.path().to_path_buf(), Duration::from_secs(10))
}

#[tokio::test]
async fn worker_write_is_effective_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let exec = executor(&dir);
    let cancel = CancellationToken::new();
    let action = Action::WriteFile {
        path: "out.txt".into(),
        content: "data".into(),
    };

    let first = exec.apply(Role::Worker, &action, &cancel).await.expect("apply");
    assert!(first.effective);
    assert_eq!(first.fingerprint, action.fingerprint());

    let again = exec.apply(Role::Worker, &action, &cancel).await.expect("apply");
    assert!(!again.effective);
    assert!(again.observation.contains("already had that content"));
}

#[tokio::test]
async fn reviewers_may_not_edit_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let exec = executor(&dir);
    let action = Action::WriteFile {
        path: "out.txt".into(),
        content: "data".into(),
    };

    let outcome = exec
        .apply(Role::Qa, &action, &CancellationToken::new())
        .await
        .expect("apply");

    assert!(!outcome.effective);
    assert!(outcome.observation.contains("qa role may not edit files"));
    assert!(!dir.path().join("out.txt").exists());
}

#[tokio::test]
async fn path_violation_becomes_an_ineffective_outcome() {
    let dir = tempfile::tempdir().expect("tempdir");
    let outcome = executor(&dir)
        .apply(
            Role::Worker,
            &Action::WriteFile {
                path: "../escape".into(),
                content: String::new(),
            },
            &CancellationToken::new(),
        )
        .await
        .expect("not fatal");

    assert!(!outcome.effective);
    assert!(outcome.observation.contains("path violation"));
}

#[cfg(unix)]
#[tokio::test]
async fn commands_run_in_the_workspace_and_report_exit_status() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("marker"), "").expect("write");
    let exec = executor(&dir);
    let cancel = CancellationToken::new();

    let ok = exec
        .apply(Role::Qa, &Action::Command { script: "ls".into() }, &cancel)
        .await
        .expect("apply");
    assert!(ok.effective);
    assert!(ok.observation.starts_with("exit 0"));
    assert!(ok.observation.contains("marker"));

    let failing = exec
        .apply(
            Role::Worker,
            &Action::Command {
                script: "echo oops >&2; exit 2".into(),
            },
            &cancel,
        )
        .await
        .expect("apply");
    assert!(failing.observation.starts_with("exit 2"));
    assert!(failing.observation.contains("[stderr]\noops"));
}

#[cfg(unix)]
#[tokio::test]
#[serial_test::serial]
async fn commands_do_not_inherit_the_relay_environment() {
    use agent_relay::models::job::{JOB_FILE_ENV, JOB_INLINE_ENV, STATE_DIR_ENV};

    let dir = tempfile::tempdir().expect("tempdir");
    std::env::set_var(STATE_DIR_ENV, "/var/lib/relay");
    std::env::set_var(JOB_FILE_ENV, "/var/lib/relay/job.json");
    std::env::set_var(JOB_INLINE_ENV, "{}");

    let outcome = executor(&dir)
        .apply(
            Role::Worker,
            &Action::Command {
                script: format!(
                    "echo \"state=${{{STATE_DIR_ENV}:-unset}} file=${{{JOB_FILE_ENV}:-unset}} job=${{{JOB_INLINE_ENV}:-unset}}\""
                ),
            },
            &CancellationToken::new(),
        )
        .await
        .expect("apply");

    for var in [STATE_DIR_ENV, JOB_FILE_ENV, JOB_INLINE_ENV] {
        std::env::remove_var(var);
    }
    assert!(
        outcome
            .observation
            .contains("state=unset file=unset job=unset"),
        "{}",
        outcome.observation
    );
}

#[cfg(unix)]
#[tokio::test]
async fn slow_command_times_out() {
    let dir = tempfile::tempdir().expect("tempdir");
    let exec = ActionExecutor::new(dir.path().to_path_buf(), Duration::from_millis(200));

    let outcome = exec
        .apply(
            Role::Worker,
            &Action::Command {
                script: "sleep 5".into(),
            },
            &CancellationToken::new(),
        )
        .await
        .expect("apply");

    assert!(!outcome.effective);
    assert!(outcome.observation.contains("timed out"));
}

#[cfg(unix)]
#[tokio::test]
async fn cancellation_interrupts_a_command() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = executor(&dir)
        .apply(
            Role::Worker,
            &Action::Command {
                script: "sleep 5".into(),
            },
            &cancel,
        )
        .await
        .expect_err("cancelled");
    assert!(err.is_cancelled());
}

#[test]
fn noop_is_never_effective_and_actions_describe_themselves() {
    assert_eq!(describe(&Action::NoOp), "no action");
    assert_eq!(
        describe(&Action::WriteFile {
            path: "a.rs".into(),
            content: "abc".into()
        }),
        "write a.rs (3 bytes)"
    );
    assert_eq!(
        Action::Command { script: " ls ".into() }.fingerprint(),
        Action::Command { script: "ls".into() }.fingerprint()
    );
    assert_ne!(
        Action::WriteFile {
            path: "a".into(),
            content: "bc".into()
        }
        .fingerprint(),
        Action::WriteFile {
            path: "ab".into(),
            content: "c".into()
        }
        .fingerprint()
    );
}
