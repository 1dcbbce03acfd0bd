//! Work sources the orchestrator polls for candidate work items.
//!
//! Every source implements [`WorkSource`]. Polls return the full current
//! candidate set; deduplication against work already dispatched is the
//! orchestrator's job, so a source may return the same item on every poll.
//! Once a session reaches a final result it reports back through
//! [`WorkSource::update_status`], which retires a delivered item upstream
//! so later polls (and restarted orchestrators) no longer return it.

pub mod directory;
pub mod file;
pub mod github;
pub mod jira;

use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use crate::config::{GlobalConfig, SourceKind};
use crate::models::work_item::WorkItem;
use crate::{AppError, BoxFuture, Result};

/// A pollable feed of work items.
pub trait WorkSource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Fetch the current candidate items.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Source` if the backend cannot be read; the
    /// orchestrator logs the failure and retries on the next tick.
    fn poll<'a>(&'a self) -> BoxFuture<'a, Result<Vec<WorkItem>>>;

    /// Report a session's final result for `item` upstream.
    ///
    /// [`ItemStatus::Done`] retires the item so it is not polled again;
    /// [`ItemStatus::Failed`] only leaves `comment` where a human will see
    /// it. Sources without an upstream ignore the call.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Source` if the backend rejects the update.
    fn update_status<'a>(
        &'a self,
        item: &'a WorkItem,
        status: ItemStatus,
        comment: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        let _ = comment;
        debug!(source = self.name(), work_item_id = %item.id, ?status, "status update ignored");
        Box::pin(std::future::ready(Ok(())))
    }
}

/// Final result of a work item as reported to its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    /// Delivered: merged, or pushed for review when auto merge is off.
    Done,
    /// The session gave up; the item stays open upstream.
    Failed,
}

/// Fixed list of items, used for a direct task given on the command line.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    items: Vec<WorkItem>,
}

impl StaticSource {
    /// Serve `items` on every poll.
    #[must_use]
    pub fn new(items: Vec<WorkItem>) -> Self {
        Self { items }
    }
}

impl WorkSource for StaticSource {
    fn name(&self) -> &'static str {
        "static"
    }

    fn poll<'a>(&'a self) -> BoxFuture<'a, Result<Vec<WorkItem>>> {
        Box::pin(async move { Ok(self.items.clone()) })
    }
}

/// Build the source selected in `[orchestrator] source`.
///
/// # Errors
///
/// Returns `AppError::Config` if the selected source lacks required
/// settings or credentials.
pub fn from_config(config: &GlobalConfig) -> Result<Arc<dyn WorkSource>> {
    let source = &config.source;
    let missing = |key: &str| AppError::Config(format!("source.{key} is required"));
    Ok(match config.orchestrator.source {
        SourceKind::File => {
            let path = source.work_file.clone().ok_or_else(|| missing("work_file"))?;
            Arc::new(file::FileSource::new(path))
        }
        SourceKind::Directory => {
            let dir = source.watch_dir.clone().ok_or_else(|| missing("watch_dir"))?;
            Arc::new(directory::DirectorySource::new(dir)?)
        }
        SourceKind::Github => {
            let repo = source.github_repo.clone().ok_or_else(|| missing("github_repo"))?;
            let token = config
                .credentials
                .github_token
                .clone()
                .ok_or_else(|| AppError::Config("github token not loaded".into()))?;
            Arc::new(github::GitHubSource::new(
                &source.github_api_url,
                &repo,
                &source.label,
                token,
            )?)
        }
        SourceKind::Jira => {
            let url = source.jira_url.clone().ok_or_else(|| missing("jira_url"))?;
            let username = source
                .jira_username
                .clone()
                .ok_or_else(|| missing("jira_username"))?;
            let token = config
                .credentials
                .jira_api_token
                .clone()
                .ok_or_else(|| AppError::Config("jira api token not loaded".into()))?;
            let query = source
                .jira_query
                .clone()
                .unwrap_or_else(|| jira::default_query(&source.label));
            Arc::new(
                jira::JiraSource::new(&url, &username, token, query)?
                    .with_done_transition(&source.jira_done_transition),
            )
        }
    })
}

/// Source a finished session reports its result to, built from the same
/// configuration as the orchestrator's source.
///
/// Returns `None` when the source cannot be built here, for example when a
/// cluster job has no source credentials; reporting is then skipped.
#[must_use]
pub fn status_reporter(config: &GlobalConfig) -> Option<Arc<dyn WorkSource>> {
    let reporter: Result<Arc<dyn WorkSource>> = match config.orchestrator.source {
        SourceKind::File | SourceKind::Github | SourceKind::Jira => from_config(config),
        SourceKind::Directory => config
            .source
            .watch_dir
            .clone()
            .map(|dir| {
                Arc::new(file::DoneList::new(directory::done_path(&dir))) as Arc<dyn WorkSource>
            })
            .ok_or_else(|| AppError::Config("source.watch_dir is required".into())),
    };
    match reporter {
        Ok(reporter) => Some(reporter),
        Err(err) => {
            debug!(%err, "no status reporter for this session");
            None
        }
    }
}

/// Matches `Repo: <url>` lines in free-text descriptions.
///
/// # Errors
///
/// Returns `AppError::Config` if the pattern fails to compile.
pub fn repo_pattern() -> Result<Regex> {
    Regex::new(r"(?i)Repo:\s*(https?://\S+)")
        .map_err(|err| AppError::Config(format!("invalid repo pattern: {err}")))
}

/// First repository URL announced in `text`, without a `.git` suffix.
#[must_use]
pub fn extract_repo_url(pattern: &Regex, text: &str) -> Option<String> {
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim_end_matches(".git").to_owned())
}
