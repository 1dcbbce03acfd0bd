//! Spawner strategies: how a dispatched work item becomes a running session.
//!
//! [`LocalSpawner`] starts detached session processes on this host through
//! the [`SessionManager`]. The cluster strategy lives in
//! [`super::cluster`].

use std::sync::Arc;

use tracing::{info, info_span, warn, Instrument};

use super::session_manager::SessionManager;
use crate::config::GlobalConfig;
use crate::models::job::JobConfig;
use crate::models::work_item::WorkItem;
use crate::{AppError, BoxFuture, Result};

/// Execution backend for dispatched work items.
pub trait Spawner: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Start a session for `item`. Returns once the session is launched;
    /// it does not wait for the work to finish.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Capacity` when no slot is free, or
    /// `AppError::Spawn` if the backend rejects the job.
    fn spawn<'a>(&'a self, item: &'a WorkItem) -> BoxFuture<'a, Result<()>>;

    /// Release whatever a failed spawn may have left behind.
    ///
    /// # Errors
    ///
    /// Returns an error if cleanup itself fails; callers log and continue.
    fn cleanup<'a>(&'a self, item: &'a WorkItem) -> BoxFuture<'a, Result<()>>;
}

/// Session name for a work item.
///
/// # Errors
///
/// Returns `AppError::Spawn` if the id has no usable characters.
pub fn session_name(item: &WorkItem) -> Result<String> {
    let name = item.sanitized_id();
    if name.is_empty() {
        return Err(AppError::Spawn(format!(
            "work item id {:?} yields an empty session name",
            item.id
        )));
    }
    Ok(name)
}

/// Runs sessions as detached processes on this host.
#[derive(Clone)]
pub struct LocalSpawner {
    manager: SessionManager,
    config: Arc<GlobalConfig>,
}

impl LocalSpawner {
    /// Create a spawner bounded by `[agent] max_agents`.
    #[must_use]
    pub fn new(manager: SessionManager, config: Arc<GlobalConfig>) -> Self {
        Self { manager, config }
    }

    async fn spawn_inner(&self, item: &WorkItem) -> Result<()> {
        let name = session_name(item)?;
        if self.manager.is_running(&name).await? {
            info!(name, "session already running, nothing to spawn");
            return Ok(());
        }

        let running = self.manager.count_running().await?;
        let max = u64::from(self.config.agent.max_agents);
        if running >= max {
            return Err(AppError::Capacity(format!(
                "max agents reached ({running}/{max})"
            )));
        }

        let workspace = self.config.workspaces_dir().join(&name);
        std::fs::create_dir_all(&workspace)?;
        let job = JobConfig::resolve(item, &self.config, workspace);

        match self.manager.start(&name, &job).await {
            Ok(state) => {
                info!(name, pid = state.pid.unwrap_or(0), "local session spawned");
                Ok(())
            }
            Err(AppError::AlreadyExists(_)) => {
                info!(name, "session started concurrently, nothing to spawn");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn cleanup_inner(&self, item: &WorkItem) -> Result<()> {
        let name = session_name(item)?;
        if self.manager.is_running(&name).await? {
            self.manager.stop(&name).await?;
        }

        let workspace = self.config.workspaces_dir().join(&name);
        let empty = std::fs::read_dir(&workspace).is_ok_and(|mut entries| entries.next().is_none());
        if empty {
            if let Err(err) = std::fs::remove_dir(&workspace) {
                warn!(%err, workspace = %workspace.display(), "failed to remove empty workspace");
            }
        }
        Ok(())
    }
}

impl Spawner for LocalSpawner {
    fn name(&self) -> &'static str {
        "local"
    }

    fn spawn<'a>(&'a self, item: &'a WorkItem) -> BoxFuture<'a, Result<()>> {
        let span = info_span!("local_spawn", work_item_id = %item.id);
        Box::pin(self.spawn_inner(item).instrument(span))
    }

    fn cleanup<'a>(&'a self, item: &'a WorkItem) -> BoxFuture<'a, Result<()>> {
        let span = info_span!("local_cleanup", work_item_id = %item.id);
        Box::pin(self.cleanup_inner(item).instrument(span))
    }
}
