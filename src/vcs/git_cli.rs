//! [`VersionControl`] implementation that shells out to the `git` binary.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use super::{VersionControl, REMOTE};
use crate::config::GitConfig;
use crate::{AppError, BoxFuture, Result};

/// Runs git commands with per-call timeouts.
#[derive(Debug, Clone)]
pub struct GitCli {
    clone_timeout: Duration,
    op_timeout: Duration,
    token: Option<String>,
}

impl GitCli {
    /// Build a client from the git configuration and an optional HTTPS token.
    #[must_use]
    pub fn new(config: &GitConfig, token: Option<String>) -> Self {
        Self {
            clone_timeout: Duration::from_secs(config.clone_timeout_seconds),
            op_timeout: Duration::from_secs(config.op_timeout_seconds),
            token,
        }
    }

    async fn run(&self, dir: Option<&Path>, args: &[&str], timeout: Duration) -> Result<String> {
        let verb = args.first().copied().unwrap_or("git");
        let mut cmd = Command::new("git");
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }

        debug!(verb, "running git");
        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| {
                AppError::Git(format!(
                    "git {verb} timed out after {}s",
                    timeout.as_secs()
                ))
            })?
            .map_err(|err| AppError::Git(format!("failed to run git {verb}: {err}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Git(format!(
                "git {verb} failed: {}",
                mask_credentials(stderr.trim())
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }

    async fn op(&self, dir: &Path, args: &[&str]) -> Result<String> {
        self.run(Some(dir), args, self.op_timeout).await
    }

    fn authenticated_url(&self, url: &str) -> String {
        match (&self.token, url.strip_prefix("https://")) {
            (Some(token), Some(rest)) if !rest.contains('@') => {
                format!("https://x-access-token:{token}@{rest}")
            }
            _ => url.to_owned(),
        }
    }
}

/// Replace the userinfo part of any URL in `text` with `***`.
#[must_use]
pub fn mask_credentials(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(scheme) = rest.find("://") {
        let (head, tail) = rest.split_at(scheme + 3);
        out.push_str(head);
        let authority_end = tail
            .find(|c: char| c == '/' || c.is_whitespace())
            .unwrap_or(tail.len());
        let authority = &tail[..authority_end];
        if let Some(at) = authority.rfind('@') {
            out.push_str("***");
            out.push_str(&authority[at..]);
        } else {
            out.push_str(authority);
        }
        rest = &tail[authority_end..];
    }
    out.push_str(rest);
    out
}

impl VersionControl for GitCli {
    fn add_safe_directory<'a>(&'a self, dir: &'a Path) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let dir = dir.to_string_lossy();
            let existing = self
                .run(
                    None,
                    &["config", "--global", "--get-all", "safe.directory"],
                    self.op_timeout,
                )
                .await
                .unwrap_or_default();
            if existing.lines().any(|line| line == dir) {
                return Ok(());
            }
            self.run(
                None,
                &["config", "--global", "--add", "safe.directory", &dir],
                self.op_timeout,
            )
            .await
            .map(|_| ())
        })
    }

    fn is_repository<'a>(&'a self, dir: &'a Path) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            if !dir.join(".git").exists() {
                return false;
            }
            self.op(dir, &["rev-parse", "--is-inside-work-tree"])
                .await
                .is_ok_and(|out| out == "true")
        })
    }

    fn clone_repo<'a>(&'a self, url: &'a str, dir: &'a Path) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let url = self.authenticated_url(url);
            let target = dir.to_string_lossy();
            self.run(None, &["clone", &url, &target], self.clone_timeout)
                .await
                .map(|_| ())
        })
    }

    fn set_config<'a>(
        &'a self,
        dir: &'a Path,
        key: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.op(dir, &["config", key, value]).await.map(|_| ()) })
    }

    fn remote_branch_exists<'a>(
        &'a self,
        dir: &'a Path,
        branch: &'a str,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let out = self.op(dir, &["ls-remote", "--heads", REMOTE, branch]).await?;
            Ok(!out.is_empty())
        })
    }

    fn fetch<'a>(&'a self, dir: &'a Path, branch: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.op(dir, &["fetch", REMOTE, branch]).await.map(|_| ()) })
    }

    fn checkout<'a>(&'a self, dir: &'a Path, reference: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.op(dir, &["checkout", reference]).await.map(|_| ()) })
    }

    fn create_branch<'a>(&'a self, dir: &'a Path, branch: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.op(dir, &["checkout", "-b", branch]).await.map(|_| ()) })
    }

    fn pull<'a>(&'a self, dir: &'a Path, branch: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.op(dir, &["pull", "--no-rebase", REMOTE, branch])
                .await
                .map(|_| ())
        })
    }

    fn push<'a>(&'a self, dir: &'a Path, branch: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.op(dir, &["push", "--set-upstream", REMOTE, branch])
                .await
                .map(|_| ())
        })
    }

    fn current_branch<'a>(&'a self, dir: &'a Path) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let name = self.op(dir, &["rev-parse", "--abbrev-ref", "HEAD"]).await?;
            if name == "HEAD" {
                return Err(AppError::Git("HEAD is detached".into()));
            }
            Ok(name)
        })
    }

    fn head_revision<'a>(&'a self, dir: &'a Path) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move { self.op(dir, &["rev-parse", "HEAD"]).await })
    }

    fn default_branch<'a>(&'a self, dir: &'a Path) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let prefix = format!("{REMOTE}/");
            if let Ok(head) = self
                .op(dir, &["symbolic-ref", "--short", &format!("refs/remotes/{REMOTE}/HEAD")])
                .await
            {
                if let Some(name) = head.strip_prefix(&prefix) {
                    return Ok(name.to_owned());
                }
            }
            // origin/HEAD is missing in some clones; ask the remote.
            let out = self.op(dir, &["ls-remote", "--symref", REMOTE, "HEAD"]).await?;
            out.lines()
                .find_map(|line| {
                    line.strip_prefix("ref: refs/heads/")
                        .and_then(|rest| rest.split_whitespace().next())
                })
                .map(ToOwned::to_owned)
                .ok_or_else(|| AppError::Git("cannot determine default branch".into()))
        })
    }

    fn commit_all<'a>(&'a self, dir: &'a Path, message: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            self.op(dir, &["add", "-A"]).await?;
            let status = self.op(dir, &["status", "--porcelain"]).await?;
            if status.is_empty() {
                return Ok(false);
            }
            self.op(dir, &["commit", "-m", message]).await?;
            Ok(true)
        })
    }

    fn merge<'a>(&'a self, dir: &'a Path, branch: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.op(dir, &["merge", "--no-ff", "--no-edit", branch])
                .await
                .map(|_| ())
        })
    }

    fn abort_merge<'a>(&'a self, dir: &'a Path) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.op(dir, &["merge", "--abort"]).await.map(|_| ()) })
    }

    fn reset_hard<'a>(
        &'a self,
        dir: &'a Path,
        remote: &'a str,
        branch: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.op(dir, &["fetch", remote, branch]).await?;
            self.op(dir, &["reset", "--hard", &format!("{remote}/{branch}")])
                .await
                .map(|_| ())
        })
    }

    fn clean<'a>(&'a self, dir: &'a Path) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.op(dir, &["clean", "-fd"]).await.map(|_| ()) })
    }

    fn tag<'a>(&'a self, dir: &'a Path, name: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.op(dir, &["tag", name]).await.map(|_| ()) })
    }

    fn delete_tag<'a>(&'a self, dir: &'a Path, name: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.op(dir, &["tag", "-d", name]).await.map(|_| ()) })
    }

    fn delete_remote_branch<'a>(
        &'a self,
        dir: &'a Path,
        branch: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.op(dir, &["push", REMOTE, "--delete", branch])
                .await
                .map(|_| ())
        })
    }
}
