//! Named workspace snapshots: git tag, state files, and signals.
//!
//! A snapshot lives in `<workspace>/.relay/snapshots/<name>/` and holds
//! `meta.json`, copies of the agent state files, and `signals.json`. The
//! matching commit is tagged `snapshot/<name>`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{info, info_span, warn, Instrument};

use crate::models::signal::{Producer, Signal};
use crate::models::snapshot::SnapshotMeta;
use crate::session::edits::write_atomic;
use crate::session::progress::{RELAY_DIR, STATE_FILE};
use crate::session::signals::SignalStore;
use crate::vcs::VersionControl;
use crate::{AppError, Result};

/// Workspace files captured by every snapshot.
pub const STATE_FILES: &[&str] = &[STATE_FILE];

const META_FILE: &str = "meta.json";
const SIGNALS_FILE: &str = "signals.json";

/// A state file that differs between the workspace and a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DivergenceEntry {
    /// Relative file path.
    pub file_path: String,
    /// Kind of divergence.
    pub kind: DivergenceKind,
}

/// The type of file divergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivergenceKind {
    /// File content has changed.
    Modified,
    /// File existed at snapshot time but is now missing.
    Deleted,
    /// File was added after the snapshot.
    Added,
}

/// What a restore changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    /// Metadata of the restored snapshot.
    pub meta: SnapshotMeta,
    /// How the live state files differed before the restore.
    pub divergences: Vec<DivergenceEntry>,
    /// Signals re-imported.
    pub signals_restored: usize,
}

/// Git tag of a snapshot.
#[must_use]
pub fn snapshot_tag(name: &str) -> String {
    format!("snapshot/{name}")
}

/// Reject names unusable as a directory or tag name.
///
/// # Errors
///
/// Returns `AppError::Config` for empty names or names with characters
/// other than ASCII letters, digits, `-`, `_`, and `.`.
pub fn validate_snapshot_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(AppError::Config(format!("invalid snapshot name {name:?}")))
    }
}

/// Saves and restores snapshots of one workspace.
pub struct SnapshotManager {
    workspace: PathBuf,
    vcs: Arc<dyn VersionControl>,
    signals: SignalStore,
}

impl SnapshotManager {
    /// Manage snapshots of `workspace`; signals come from `signals`.
    #[must_use]
    pub fn new(workspace: PathBuf, vcs: Arc<dyn VersionControl>, signals: SignalStore) -> Self {
        Self {
            workspace,
            vcs,
            signals,
        }
    }

    /// Directory holding all snapshots.
    #[must_use]
    pub fn root(&self) -> PathBuf {
        self.workspace.join(RELAY_DIR).join("snapshots")
    }

    fn dir(&self, name: &str) -> PathBuf {
        self.root().join(name)
    }

    /// Capture the workspace under `name`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AlreadyExists` if the name is taken,
    /// `AppError::Git` if the commit cannot be tagged, or `AppError::Io` /
    /// `AppError::Db` if the state cannot be copied.
    pub async fn save(&self, name: &str, description: &str) -> Result<SnapshotMeta> {
        validate_snapshot_name(name)?;
        let span = info_span!("snapshot_save", name);
        async {
            let dir = self.dir(name);
            if dir.exists() {
                return Err(AppError::AlreadyExists(format!("snapshot {name} exists")));
            }

            let revision = self.vcs.head_revision(&self.workspace).await?;
            let tag = snapshot_tag(name);
            self.vcs.tag(&self.workspace, &tag).await?;

            match self.write_snapshot(&dir, name, description, revision).await {
                Ok(meta) => {
                    info!(revision = %meta.revision, files = meta.file_hashes.len(), "snapshot saved");
                    Ok(meta)
                }
                Err(err) => {
                    if let Err(cleanup) = std::fs::remove_dir_all(&dir) {
                        warn!(%cleanup, "failed to remove partial snapshot");
                    }
                    if let Err(untag) = self.vcs.delete_tag(&self.workspace, &tag).await {
                        warn!(%untag, "failed to remove snapshot tag");
                    }
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn write_snapshot(
        &self,
        dir: &Path,
        name: &str,
        description: &str,
        revision: String,
    ) -> Result<SnapshotMeta> {
        std::fs::create_dir_all(dir)?;
        let mut file_hashes = BTreeMap::new();
        for file in STATE_FILES {
            let source = self.workspace.join(file);
            if let Ok(bytes) = std::fs::read(&source) {
                write_atomic(&dir.join(file), &bytes)?;
                file_hashes.insert((*file).to_owned(), sha256_hex(&bytes));
            }
        }

        let signals = self.signals.list().await?;
        write_atomic(&dir.join(SIGNALS_FILE), &serde_json::to_vec_pretty(&signals)?)?;

        let meta = SnapshotMeta {
            name: name.to_owned(),
            description: description.to_owned(),
            created_at: Utc::now(),
            revision,
            file_hashes,
        };
        write_atomic(&dir.join(META_FILE), &serde_json::to_vec_pretty(&meta)?)?;
        Ok(meta)
    }

    /// Return the workspace to snapshot `name`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` before touching anything if the
    /// snapshot does not exist, `AppError::Git` if the tag cannot be checked
    /// out, or `AppError::Io` / `AppError::Db` if state cannot be restored.
    pub async fn restore(&self, name: &str) -> Result<RestoreReport> {
        validate_snapshot_name(name)?;
        let dir = self.dir(name);
        if !dir.join(META_FILE).exists() {
            return Err(AppError::NotFound(format!("snapshot {name} not found")));
        }
        let span = info_span!("snapshot_restore", name);
        async {
            let meta = read_meta(&dir)?;
            let signals: Vec<Signal> =
                serde_json::from_str(&std::fs::read_to_string(dir.join(SIGNALS_FILE))?)?;

            let divergences = find_divergences(&meta.file_hashes, &hash_state_files(&self.workspace));
            if !divergences.is_empty() {
                warn!(count = divergences.len(), "state files diverged since snapshot");
            }

            self.vcs.checkout(&self.workspace, &snapshot_tag(name)).await?;

            for file in STATE_FILES {
                let backup = dir.join(file);
                let live = self.workspace.join(file);
                if backup.exists() {
                    write_atomic(&live, &std::fs::read(&backup)?)?;
                } else if live.exists() {
                    std::fs::remove_file(&live)?;
                }
            }

            self.signals.import(&signals, Producer::Operator).await?;
            info!(revision = %meta.revision, signals = signals.len(), "snapshot restored");
            Ok(RestoreReport {
                meta,
                divergences,
                signals_restored: signals.len(),
            })
        }
        .instrument(span)
        .await
    }

    /// All snapshots, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the snapshot directory cannot be read.
    pub fn list(&self) -> Result<Vec<SnapshotMeta>> {
        let root = self.root();
        if !root.exists() {
            return Ok(Vec::new());
        }
        let mut metas = Vec::new();
        for entry in std::fs::read_dir(&root)? {
            let path = entry?.path();
            match read_meta(&path) {
                Ok(meta) => metas.push(meta),
                Err(err) => warn!(%err, dir = %path.display(), "skipping unreadable snapshot"),
            }
        }
        metas.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(metas)
    }

    /// Remove snapshot `name` and its tag.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the snapshot does not exist or
    /// `AppError::Io` if its directory cannot be removed.
    pub async fn delete(&self, name: &str) -> Result<()> {
        validate_snapshot_name(name)?;
        let dir = self.dir(name);
        if !dir.exists() {
            return Err(AppError::NotFound(format!("snapshot {name} not found")));
        }
        std::fs::remove_dir_all(&dir)?;
        if let Err(err) = self.vcs.delete_tag(&self.workspace, &snapshot_tag(name)).await {
            warn!(%err, name, "failed to delete snapshot tag");
        }
        info!(name, "snapshot deleted");
        Ok(())
    }
}

fn read_meta(dir: &Path) -> Result<SnapshotMeta> {
    let raw = std::fs::read_to_string(dir.join(META_FILE))?;
    Ok(serde_json::from_str(&raw)?)
}

/// SHA-256 of each state file present in `workspace`.
#[must_use]
pub fn hash_state_files(workspace: &Path) -> BTreeMap<String, String> {
    STATE_FILES
        .iter()
        .filter_map(|file| {
            std::fs::read(workspace.join(file))
                .ok()
                .map(|bytes| ((*file).to_owned(), sha256_hex(&bytes)))
        })
        .collect()
}

/// Compare snapshot hashes against current hashes.
#[must_use]
pub fn find_divergences(
    saved: &BTreeMap<String, String>,
    current: &BTreeMap<String, String>,
) -> Vec<DivergenceEntry> {
    let mut diverged = Vec::new();

    for (file, old_hash) in saved {
        match current.get(file) {
            Some(new_hash) if new_hash != old_hash => diverged.push(DivergenceEntry {
                file_path: file.clone(),
                kind: DivergenceKind::Modified,
            }),
            None => diverged.push(DivergenceEntry {
                file_path: file.clone(),
                kind: DivergenceKind::Deleted,
            }),
            _ => {}
        }
    }
    for file in current.keys() {
        if !saved.contains_key(file) {
            diverged.push(DivergenceEntry {
                file_path: file.clone(),
                kind: DivergenceKind::Added,
            });
        }
    }

    diverged.sort_by(|a, b| a.file_path.cmp(&b.file_path));
    diverged
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
