//! Version-control capability and the branch workflows built on it.
//!
//! [`VersionControl`] is the plumbing contract (one method per git
//! primitive). [`branch::BranchLifecycle`] sequences those primitives into
//! an idempotent workspace setup, and [`recovery`] offers repair
//! operations that are safe to call speculatively.

pub mod branch;
pub mod git_cli;
pub mod recovery;

use std::path::Path;

use crate::{BoxFuture, Result};

/// Default remote every workflow talks to.
pub const REMOTE: &str = "origin";

/// Git primitives the branch lifecycle and session depend on.
///
/// Every method operates on the repository at `dir`. Implementations bound
/// each call with a timeout.
pub trait VersionControl: Send + Sync {
    /// Mark `dir` as a safe directory in the global git configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Git` if the command fails.
    fn add_safe_directory<'a>(&'a self, dir: &'a Path) -> BoxFuture<'a, Result<()>>;

    /// Whether `dir` holds a valid repository checkout.
    fn is_repository<'a>(&'a self, dir: &'a Path) -> BoxFuture<'a, bool>;

    /// Clone `url` into `dir`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Git` if the clone fails or times out.
    fn clone_repo<'a>(&'a self, url: &'a str, dir: &'a Path) -> BoxFuture<'a, Result<()>>;

    /// Set a repository-local configuration value.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Git` if the command fails.
    fn set_config<'a>(
        &'a self,
        dir: &'a Path,
        key: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, Result<()>>;

    /// Whether `branch` exists on the remote.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Git` if the remote cannot be queried.
    fn remote_branch_exists<'a>(&'a self, dir: &'a Path, branch: &'a str)
        -> BoxFuture<'a, Result<bool>>;

    /// Fetch `branch` from the remote.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Git` if the fetch fails.
    fn fetch<'a>(&'a self, dir: &'a Path, branch: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Check out an existing local or remote-tracking branch, or a tag.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Git` if the checkout fails.
    fn checkout<'a>(&'a self, dir: &'a Path, reference: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Create `branch` from the current HEAD and check it out.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Git` if the branch cannot be created.
    fn create_branch<'a>(&'a self, dir: &'a Path, branch: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Pull `branch` from the remote into the current branch.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Git` if the pull fails.
    fn pull<'a>(&'a self, dir: &'a Path, branch: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Push `branch` to the remote and set its upstream. Never forced.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Git` if the push is rejected or fails.
    fn push<'a>(&'a self, dir: &'a Path, branch: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Name of the checked-out branch.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Git` if HEAD is detached or unreadable.
    fn current_branch<'a>(&'a self, dir: &'a Path) -> BoxFuture<'a, Result<String>>;

    /// Commit hash of HEAD.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Git` if HEAD cannot be resolved.
    fn head_revision<'a>(&'a self, dir: &'a Path) -> BoxFuture<'a, Result<String>>;

    /// The remote's default branch (what `origin/HEAD` points at).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Git` if it cannot be determined.
    fn default_branch<'a>(&'a self, dir: &'a Path) -> BoxFuture<'a, Result<String>>;

    /// Stage everything and commit. Returns `false` when there was nothing
    /// to commit.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Git` if staging or committing fails.
    fn commit_all<'a>(&'a self, dir: &'a Path, message: &'a str) -> BoxFuture<'a, Result<bool>>;

    /// Merge `branch` into the current branch.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Git` on conflicts or failure.
    fn merge<'a>(&'a self, dir: &'a Path, branch: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Abort an in-progress merge.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Git` if no merge is in progress or the abort fails.
    fn abort_merge<'a>(&'a self, dir: &'a Path) -> BoxFuture<'a, Result<()>>;

    /// Hard-reset the current branch to `<remote>/<branch>`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Git` if the reset fails.
    fn reset_hard<'a>(
        &'a self,
        dir: &'a Path,
        remote: &'a str,
        branch: &'a str,
    ) -> BoxFuture<'a, Result<()>>;

    /// Remove untracked files and directories. Ignored files are kept.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Git` if the clean fails.
    fn clean<'a>(&'a self, dir: &'a Path) -> BoxFuture<'a, Result<()>>;

    /// Create a lightweight tag at HEAD.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Git` if the tag exists or cannot be created.
    fn tag<'a>(&'a self, dir: &'a Path, name: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Delete a local tag.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Git` if the tag cannot be deleted.
    fn delete_tag<'a>(&'a self, dir: &'a Path, name: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Delete `branch` on the remote.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Git` if the push fails.
    fn delete_remote_branch<'a>(&'a self, dir: &'a Path, branch: &'a str)
        -> BoxFuture<'a, Result<()>>;
}
