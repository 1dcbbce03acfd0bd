//! `GitCli` against a scratch repository. Skipped when `git` is missing.

use std::process::Command;

use agent_relay::config::GitConfig;
use agent_relay::vcs::git_cli::GitCli;
use agent_relay::vcs::VersionControl;

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|out| out.status.success())
}

#[tokio::test]
async fn clean_removes_untracked_files_but_keeps_ignored_ones() {
    if !git_available() {
        return;
    }
    let dir = tempfile::tempdir().expect("tempdir");
    let ws = dir.path();
    let status = Command::new("git")
        .args(["init", "--quiet"])
        .current_dir(ws)
        .status()
        .expect("git init");
    assert!(status.success());

    std::fs::write(ws.join(".gitignore"), "*.log\n").expect("write");
    std::fs::write(ws.join("debug.log"), "kept").expect("write");
    std::fs::write(ws.join("scratch.txt"), "removed").expect("write");
    std::fs::create_dir_all(ws.join("tmp")).expect("mkdir");
    std::fs::write(ws.join("tmp/out.txt"), "removed").expect("write");

    let git = GitCli::new(&GitConfig::default(), None);
    assert!(git.is_repository(ws).await);
    git.clean(ws).await.expect("clean");

    assert!(ws.join("debug.log").exists(), "ignored file kept");
    assert!(!ws.join("scratch.txt").exists());
    assert!(!ws.join("tmp").exists());
}
