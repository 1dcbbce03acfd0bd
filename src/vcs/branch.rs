//! Branch lifecycle: idempotent, resumable workspace setup.
//!
//! Setup is best-effort. Each failing git step is logged and recorded as a
//! warning and the sequence continues; [`BranchLifecycle::verify`] is the
//! post-condition the session checks before iterating.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, info_span, warn, Instrument};

use super::VersionControl;
use crate::{AppError, Result};

/// Prefix of feature branches.
pub const FEATURE_PREFIX: &str = "agent/";

/// Prefix of epic integration branches.
pub const EPIC_PREFIX: &str = "agent-epic/";

/// Feature branch name for a work item, optionally suffixed.
#[must_use]
pub fn feature_branch(work_item_id: &str, suffix: Option<&str>) -> String {
    match suffix {
        Some(suffix) => format!("{FEATURE_PREFIX}{work_item_id}-{suffix}"),
        None => format!("{FEATURE_PREFIX}{work_item_id}"),
    }
}

/// Epic integration branch name.
#[must_use]
pub fn epic_branch(epic_id: &str) -> String {
    format!("{EPIC_PREFIX}{epic_id}")
}

/// Timestamp suffix used by the unique-names policy.
#[must_use]
pub fn timestamp_suffix() -> String {
    Utc::now().format("%Y%m%d%H%M%S").to_string()
}

/// Commit identity for automated commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitIdentity {
    /// `user.name`.
    pub name: String,
    /// `user.email`.
    pub email: String,
}

/// Inputs of one setup run.
#[derive(Debug, Clone)]
pub struct BranchRequest {
    /// Repository to clone; empty means a caller-provided local workspace.
    pub repo_url: String,
    /// Checkout directory.
    pub workspace: PathBuf,
    /// Work item identifier.
    pub work_item_id: String,
    /// Parent epic, if any.
    pub epic_id: Option<String>,
    /// Explicit feature branch, e.g. the one recorded by a previous run.
    pub feature_branch: Option<String>,
    /// Timestamp-suffix new feature branches.
    pub unique_names: bool,
}

impl BranchRequest {
    /// Feature branch this request resolves to.
    #[must_use]
    pub fn resolve_feature_branch(&self) -> String {
        if let Some(branch) = &self.feature_branch {
            return branch.clone();
        }
        if self.unique_names {
            feature_branch(&self.work_item_id, Some(&timestamp_suffix()))
        } else {
            feature_branch(&self.work_item_id, None)
        }
    }
}

/// How a branch was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchOrigin {
    /// Created locally from the base and pushed.
    Created,
    /// Already on the remote; fetched and checked out.
    Resumed,
    /// Another worker pushed it between our existence check and our push;
    /// we adopted theirs.
    Adopted,
}

/// Branches a workspace ended up with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceBranches {
    /// Feature branch the session works on.
    pub feature: String,
    /// Branch the feature merges into (epic or default branch).
    pub base: String,
    /// Epic integration branch, if any.
    pub epic: Option<String>,
    /// How the feature branch was obtained.
    pub feature_origin: BranchOrigin,
    /// Steps that failed and were skipped.
    pub warnings: Vec<String>,
}

/// Sequences workspace creation and branch selection.
#[derive(Clone)]
pub struct BranchLifecycle {
    vcs: Arc<dyn VersionControl>,
    identity: GitIdentity,
}

impl BranchLifecycle {
    /// Create a lifecycle manager.
    #[must_use]
    pub fn new(vcs: Arc<dyn VersionControl>, identity: GitIdentity) -> Self {
        Self { vcs, identity }
    }

    /// Prepare the workspace and branches for a work item.
    ///
    /// Returns `None` when no repository URL was given.
    pub async fn setup(&self, request: &BranchRequest) -> Option<WorkspaceBranches> {
        if request.repo_url.trim().is_empty() {
            info!(
                workspace = %request.workspace.display(),
                "no repository url, using local workspace as-is"
            );
            return None;
        }

        let span = info_span!(
            "branch_setup",
            work_item_id = %request.work_item_id,
            workspace = %request.workspace.display()
        );
        Some(self.setup_inner(request).instrument(span).await)
    }

    async fn setup_inner(&self, request: &BranchRequest) -> WorkspaceBranches {
        let ws = request.workspace.as_path();
        let mut warnings = Vec::new();

        note(
            &mut warnings,
            "register safe directory",
            self.vcs.add_safe_directory(ws).await,
        );

        if self.vcs.is_repository(ws).await {
            info!("workspace already holds a checkout, skipping clone");
        } else {
            if let Some(parent) = ws.parent() {
                if let Err(err) = std::fs::create_dir_all(parent) {
                    note(&mut warnings, "create workspace parent", Err(err.into()));
                }
            }
            note(
                &mut warnings,
                "clone",
                self.vcs.clone_repo(&request.repo_url, ws).await,
            );
        }

        note(
            &mut warnings,
            "set user.name",
            self.vcs.set_config(ws, "user.name", &self.identity.name).await,
        );
        note(
            &mut warnings,
            "set user.email",
            self.vcs.set_config(ws, "user.email", &self.identity.email).await,
        );

        let default = match self.vcs.default_branch(ws).await {
            Ok(branch) => branch,
            Err(err) => {
                note(&mut warnings, "resolve default branch", Err(err));
                self.vcs
                    .current_branch(ws)
                    .await
                    .unwrap_or_else(|_| "main".into())
            }
        };

        let mut base = default.clone();
        let epic = request.epic_id.as_deref().map(epic_branch);
        if let Some(epic) = &epic {
            self.select_branch(ws, epic, &default, &mut warnings).await;
            base.clone_from(epic);
        }

        let feature = request.resolve_feature_branch();
        let feature_origin = self
            .select_branch(ws, &feature, &base, &mut warnings)
            .await;

        info!(
            feature = %feature,
            base = %base,
            origin = ?feature_origin,
            warnings = warnings.len(),
            "branch setup finished"
        );

        WorkspaceBranches {
            feature,
            base,
            epic,
            feature_origin,
            warnings,
        }
    }

    /// Resume `branch` from the remote, or create it from `base` and push it.
    async fn select_branch(
        &self,
        ws: &Path,
        branch: &str,
        base: &str,
        warnings: &mut Vec<String>,
    ) -> BranchOrigin {
        let exists = match self.vcs.remote_branch_exists(ws, branch).await {
            Ok(exists) => exists,
            Err(err) => {
                note(warnings, "query remote branch", Err(err));
                false
            }
        };

        if exists {
            self.resume(ws, branch, warnings).await;
            return BranchOrigin::Resumed;
        }

        if self.vcs.current_branch(ws).await.ok().as_deref() != Some(base) {
            note(warnings, "checkout base", self.vcs.checkout(ws, base).await);
        }
        if let Err(err) = self.vcs.create_branch(ws, branch).await {
            // A previous run may have created the branch locally without pushing it.
            warn!(branch, %err, "create branch failed, trying existing local branch");
            note(warnings, "checkout local branch", self.vcs.checkout(ws, branch).await);
        }

        match self.vcs.push(ws, branch).await {
            Ok(()) => BranchOrigin::Created,
            Err(err) => {
                let raced = self
                    .vcs
                    .remote_branch_exists(ws, branch)
                    .await
                    .unwrap_or(false);
                if raced {
                    warn!(branch, %err, "branch appeared on the remote concurrently, adopting it");
                    warnings.push(format!("adopted concurrently created branch {branch}"));
                    self.resume(ws, branch, warnings).await;
                    BranchOrigin::Adopted
                } else {
                    note(warnings, "push new branch", Err(err));
                    BranchOrigin::Created
                }
            }
        }
    }

    async fn resume(&self, ws: &Path, branch: &str, warnings: &mut Vec<String>) {
        note(warnings, "fetch", self.vcs.fetch(ws, branch).await);
        note(warnings, "checkout", self.vcs.checkout(ws, branch).await);
        note(warnings, "pull", self.vcs.pull(ws, branch).await);
    }

    /// Post-condition: the expected feature branch is checked out.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Git` if another branch (or none) is checked out.
    pub async fn verify(&self, workspace: &Path, branches: &WorkspaceBranches) -> Result<()> {
        let current = self.vcs.current_branch(workspace).await?;
        if current == branches.feature {
            Ok(())
        } else {
            Err(AppError::Git(format!(
                "expected branch {} checked out, found {current}",
                branches.feature
            )))
        }
    }
}

fn note(warnings: &mut Vec<String>, step: &str, result: Result<()>) {
    if let Err(err) = result {
        warn!(step, %err, "git step failed, continuing");
        warnings.push(format!("{step}: {err}"));
    }
}
