//! JSON work file source.

use std::collections::HashSet;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{ItemStatus, WorkSource};
use crate::models::work_item::WorkItem;
use crate::{AppError, BoxFuture, Result};

/// Reads a JSON array of work items from one file on every poll.
///
/// Ids listed in a sibling `<file>.done` file (one per line) are skipped,
/// so finished work can be retired without editing the work file. A
/// delivered item is appended to that list.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    done: DoneList,
}

impl FileSource {
    /// Read items from `path`.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        let mut name = path.as_os_str().to_owned();
        name.push(".done");
        Self {
            path,
            done: DoneList::new(PathBuf::from(name)),
        }
    }

    /// Path of the done list next to the work file.
    #[must_use]
    pub fn done_path(&self) -> PathBuf {
        self.done.path().to_path_buf()
    }
}

/// Newline-separated ids of retired work items.
///
/// Also usable on its own as the status reporter of a file-based source:
/// it polls nothing and records delivered items.
#[derive(Debug, Clone)]
pub struct DoneList {
    path: PathBuf,
}

impl DoneList {
    /// List stored at `path`; a missing file is an empty list.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ids currently retired.
    #[must_use]
    pub fn ids(&self) -> HashSet<String> {
        read_done(&self.path)
    }

    /// Retire `id`. Already listed ids are not written twice.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Source` if the file cannot be written.
    pub fn add(&self, id: &str) -> Result<()> {
        if self.ids().contains(id) {
            return Ok(());
        }
        let write = || -> std::io::Result<()> {
            let needs_newline = std::fs::read(&self.path)
                .is_ok_and(|raw| raw.last().is_some_and(|b| *b != b'\n'));
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            if needs_newline {
                writeln!(file)?;
            }
            writeln!(file, "{id}")
        };
        write().map_err(|err| {
            AppError::Source(format!("cannot update {}: {err}", self.path.display()))
        })?;
        info!(work_item_id = id, path = %self.path.display(), "work item retired");
        Ok(())
    }
}

impl WorkSource for DoneList {
    fn name(&self) -> &'static str {
        "done-list"
    }

    fn poll<'a>(&'a self) -> BoxFuture<'a, Result<Vec<WorkItem>>> {
        Box::pin(std::future::ready(Ok(Vec::new())))
    }

    fn update_status<'a>(
        &'a self,
        item: &'a WorkItem,
        status: ItemStatus,
        _comment: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match status {
                ItemStatus::Done => self.add(&item.id),
                ItemStatus::Failed => Ok(()),
            }
        })
    }
}

/// Parse a JSON array of work items.
///
/// # Errors
///
/// Returns `AppError::Source` if the file cannot be read or parsed.
pub fn read_items(path: &Path) -> Result<Vec<WorkItem>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| AppError::Source(format!("cannot read {}: {err}", path.display())))?;
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&raw)
        .map_err(|err| AppError::Source(format!("invalid work file {}: {err}", path.display())))
}

fn read_done(path: &Path) -> HashSet<String> {
    std::fs::read_to_string(path)
        .map(|raw| {
            raw.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

impl WorkSource for FileSource {
    fn name(&self) -> &'static str {
        "file"
    }

    fn poll<'a>(&'a self) -> BoxFuture<'a, Result<Vec<WorkItem>>> {
        Box::pin(async move {
            let done = self.done.ids();
            let items: Vec<WorkItem> = read_items(&self.path)?
                .into_iter()
                .filter(|item| !done.contains(&item.id))
                .collect();
            debug!(path = %self.path.display(), count = items.len(), "work file polled");
            Ok(items)
        })
    }

    fn update_status<'a>(
        &'a self,
        item: &'a WorkItem,
        status: ItemStatus,
        comment: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        self.done.update_status(item, status, comment)
    }
}
