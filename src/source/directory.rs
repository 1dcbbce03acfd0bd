//! Watched directory of JSON work files.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use super::file::{read_items, DoneList};
use super::{ItemStatus, WorkSource};
use crate::models::work_item::WorkItem;
use crate::{AppError, BoxFuture, Result};

/// Every `*.json` file in a directory, each holding an array of items.
///
/// A `notify` watcher marks the directory dirty on change; polls re-read
/// the files only when dirty and otherwise serve the cached items. Ids in
/// the directory's `.done` list are never returned.
pub struct DirectorySource {
    dir: PathBuf,
    done: DoneList,
    dirty: Arc<AtomicBool>,
    cache: Mutex<Vec<WorkItem>>,
    _watcher: RecommendedWatcher,
}

impl DirectorySource {
    /// Watch `dir` for work files.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the directory cannot be created or
    /// watched.
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .map_err(|err| AppError::Config(format!("cannot create {}: {err}", dir.display())))?;

        let dirty = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&dirty);
        let mut watcher = notify::recommended_watcher(
            move |result: std::result::Result<Event, notify::Error>| match result {
                Ok(event)
                    if matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    ) =>
                {
                    flag.store(true, Ordering::SeqCst);
                }
                Ok(_) => {}
                Err(err) => warn!(%err, "work directory watch error"),
            },
        )
        .map_err(|err| AppError::Config(format!("failed to create directory watcher: {err}")))?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|err| AppError::Config(format!("failed to watch {}: {err}", dir.display())))?;

        info!(dir = %dir.display(), "watching work directory");
        Ok(Self {
            done: DoneList::new(done_path(&dir)),
            dir,
            dirty,
            cache: Mutex::new(Vec::new()),
            _watcher: watcher,
        })
    }

    fn rescan(&self) -> Result<Vec<WorkItem>> {
        let pattern = self.dir.join("*.json");
        let pattern = pattern
            .to_str()
            .ok_or_else(|| AppError::Source("work directory path is not valid UTF-8".into()))?;
        let mut files: Vec<PathBuf> = glob::glob(pattern)
            .map_err(|err| AppError::Source(format!("invalid glob: {err}")))?
            .filter_map(std::result::Result::ok)
            .collect();
        files.sort();

        let mut items = Vec::new();
        for file in &files {
            match read_items(file) {
                Ok(found) => items.extend(found),
                Err(err) => warn!(%err, file = %file.display(), "skipping unreadable work file"),
            }
        }
        debug!(files = files.len(), items = items.len(), "work directory rescanned");
        Ok(items)
    }

    /// Directory being watched.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl WorkSource for DirectorySource {
    fn name(&self) -> &'static str {
        "directory"
    }

    fn poll<'a>(&'a self) -> BoxFuture<'a, Result<Vec<WorkItem>>> {
        Box::pin(async move {
            if self.dirty.swap(false, Ordering::SeqCst) {
                match self.rescan() {
                    Ok(items) => {
                        let mut cache = self
                            .cache
                            .lock()
                            .map_err(|_| AppError::Source("work cache poisoned".into()))?;
                        *cache = items;
                    }
                    Err(err) => {
                        self.dirty.store(true, Ordering::SeqCst);
                        return Err(err);
                    }
                }
            }
            let cache = self
                .cache
                .lock()
                .map_err(|_| AppError::Source("work cache poisoned".into()))?;
            let done = self.done.ids();
            Ok(cache
                .iter()
                .filter(|item| !done.contains(&item.id))
                .cloned()
                .collect())
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

/// Done list of a watched work directory.
#[must_use]
pub fn done_path(dir: &Path) -> PathBuf {
    dir.join(".done")
}
