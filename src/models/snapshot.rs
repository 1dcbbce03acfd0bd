//! Snapshot metadata stored next to each saved workspace checkpoint.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Contents of a snapshot's `meta.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SnapshotMeta {
    /// Unique snapshot name within the workspace.
    pub name: String,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Commit the snapshot tag points at.
    pub revision: String,
    /// SHA-256 of each backed-up state file, keyed by relative path.
    #[serde(default)]
    pub file_hashes: BTreeMap<String, String>,
}
