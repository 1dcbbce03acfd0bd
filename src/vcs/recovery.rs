//! Workspace repair primitives.
//!
//! Each operation is idempotent: running it on a healthy workspace is a
//! no-op, so automation may call them speculatively.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::{VersionControl, REMOTE};
use crate::{AppError, Result};

/// Lock files git leaves behind when a process dies mid-operation.
const ROOT_LOCKS: [&str; 3] = ["index.lock", "HEAD.lock", "config.lock"];

/// Delete stale git lock files. Returns the files removed.
///
/// # Errors
///
/// Returns `AppError::Io` if a lock file exists but cannot be removed.
pub fn remove_stale_locks(workspace: &Path) -> Result<Vec<PathBuf>> {
    let git_dir = workspace.join(".git");
    let mut candidates: Vec<PathBuf> = ROOT_LOCKS.iter().map(|l| git_dir.join(l)).collect();

    let pattern = git_dir.join("refs").join("**").join("*.lock");
    match glob::glob(&pattern.to_string_lossy()) {
        Ok(paths) => candidates.extend(paths.flatten()),
        Err(err) => warn!(%err, "invalid lock glob pattern"),
    }

    let mut removed = Vec::new();
    for path in candidates {
        if path.is_file() {
            std::fs::remove_file(&path).map_err(|err| {
                AppError::Io(format!("cannot remove {}: {err}", path.display()))
            })?;
            info!(lock = %path.display(), "removed stale lock");
            removed.push(path);
        }
    }
    Ok(removed)
}

/// Whether a merge is in progress.
#[must_use]
pub fn merge_in_progress(workspace: &Path) -> bool {
    workspace.join(".git").join("MERGE_HEAD").exists()
}

/// Abort an in-progress merge. Returns whether there was one.
///
/// # Errors
///
/// Returns `AppError::Git` if a merge is in progress and cannot be aborted.
pub async fn abort_merge(vcs: &dyn VersionControl, workspace: &Path) -> Result<bool> {
    if !merge_in_progress(workspace) {
        return Ok(false);
    }
    vcs.abort_merge(workspace).await?;
    info!(workspace = %workspace.display(), "aborted merge");
    Ok(true)
}

/// Remove untracked files and directories.
///
/// # Errors
///
/// Returns `AppError::Git` if the clean fails.
pub async fn clean(vcs: &dyn VersionControl, workspace: &Path) -> Result<()> {
    vcs.clean(workspace).await?;
    info!(workspace = %workspace.display(), "cleaned untracked files");
    Ok(())
}

/// Discard local state and match `origin/<branch>`.
///
/// # Errors
///
/// Returns `AppError::Git` if the fetch or reset fails.
pub async fn reset_hard(vcs: &dyn VersionControl, workspace: &Path, branch: &str) -> Result<()> {
    vcs.reset_hard(workspace, REMOTE, branch).await?;
    info!(workspace = %workspace.display(), branch, "reset to remote");
    Ok(())
}

/// Which repairs to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryPlan {
    /// Remove untracked files.
    pub clean: bool,
    /// Reset hard to this remote branch.
    pub reset_to: Option<String>,
    /// Abort an in-progress merge.
    pub abort_merge: bool,
}

/// What a recovery run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Lock files removed.
    pub locks_removed: Vec<PathBuf>,
    /// Whether a merge was aborted.
    pub merge_aborted: bool,
    /// Whether untracked files were removed.
    pub cleaned: bool,
    /// Branch the workspace was reset to.
    pub reset_to: Option<String>,
}

/// Run stale-lock removal followed by the requested repairs, in the order
/// lock removal, merge abort, reset, clean.
///
/// # Errors
///
/// Returns the first failing step's error.
pub async fn recover(
    vcs: &dyn VersionControl,
    workspace: &Path,
    plan: &RecoveryPlan,
) -> Result<RecoveryReport> {
    let mut report = RecoveryReport {
        locks_removed: remove_stale_locks(workspace)?,
        ..RecoveryReport::default()
    };
    if plan.abort_merge {
        report.merge_aborted = abort_merge(vcs, workspace).await?;
    }
    if let Some(branch) = &plan.reset_to {
        reset_hard(vcs, workspace, branch).await?;
        report.reset_to = Some(branch.clone());
    }
    if plan.clean {
        clean(vcs, workspace).await?;
        report.cleaned = true;
    }
    Ok(report)
}
