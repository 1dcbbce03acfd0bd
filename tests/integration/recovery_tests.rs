//! Workspace repair against the in-memory repository.

use agent_relay::vcs::recovery::{merge_in_progress, recover, remove_stale_locks, RecoveryPlan};

use super::test_helpers::MockVcs;

fn broken_workspace() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    let git = dir.path().join(".git");
    std::fs::create_dir_all(git.join("refs/heads/agent")).expect("mkdir");
    std::fs::write(git.join("index.lock"), "").expect("lock");
    std::fs::write(git.join("refs/heads/agent/item-1.lock"), "").expect("lock");
    std::fs::write(git.join("MERGE_HEAD"), "abc123\n").expect("merge head");
    dir
}

#[tokio::test]
async fn full_plan_runs_every_repair_in_order() {
    let dir = broken_workspace();
    let vcs = MockVcs::new();
    let plan = RecoveryPlan {
        clean: true,
        reset_to: Some("agent/item-1".into()),
        abort_merge: true,
    };

    let report = recover(&vcs, dir.path(), &plan).await.expect("recover");

    assert_eq!(report.locks_removed.len(), 2);
    assert!(report.merge_aborted);
    assert!(report.cleaned);
    assert_eq!(report.reset_to.as_deref(), Some("agent/item-1"));
    assert_eq!(
        vcs.calls(),
        vec![
            "abort_merge".to_owned(),
            "reset_hard origin/agent/item-1".to_owned(),
            "clean".to_owned(),
        ]
    );
    assert!(!dir.path().join(".git/index.lock").exists());
}

#[tokio::test]
async fn healthy_workspace_is_left_alone() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(dir.path().join(".git")).expect("mkdir");
    let vcs = MockVcs::new();
    let plan = RecoveryPlan {
        abort_merge: true,
        ..RecoveryPlan::default()
    };

    let report = recover(&vcs, dir.path(), &plan).await.expect("recover");

    assert!(report.locks_removed.is_empty());
    assert!(!report.merge_aborted);
    assert!(vcs.calls().is_empty(), "no merge to abort");
}

#[tokio::test]
async fn lock_removal_is_idempotent() {
    let dir = broken_workspace();
    assert!(merge_in_progress(dir.path()));

    assert_eq!(remove_stale_locks(dir.path()).expect("first").len(), 2);
    assert!(remove_stale_locks(dir.path()).expect("second").is_empty());
}

#[tokio::test]
async fn failing_step_stops_the_run() {
    let dir = broken_workspace();
    let vcs = MockVcs::new().failing("reset_hard");
    let plan = RecoveryPlan {
        clean: true,
        reset_to: Some("main".into()),
        abort_merge: false,
    };

    let err = recover(&vcs, dir.path(), &plan).await.expect_err("reset fails");

    assert!(err.to_string().contains("reset_hard failed"));
    assert!(!vcs.called("clean"));
}
