//! Work item model produced by work sources.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Longest DNS label, the tightest place a sanitized id ends up.
pub const MAX_LABEL_LEN: usize = 63;

const DIGEST_LEN: usize = 8;

/// One discrete unit of requested work.
///
/// The identifier is the deduplication key across poll cycles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkItem {
    /// Stable identifier, e.g. `PROJ-12` or `gh-42`.
    pub id: String,
    /// One-line human summary.
    pub summary: String,
    /// Free-text description handed to the agent.
    #[serde(default)]
    pub description: String,
    /// Explicit repository to clone.
    #[serde(default)]
    pub repo_url: Option<String>,
    /// Parent epic whose integration branch receives the work.
    #[serde(default)]
    pub epic_id: Option<String>,
    /// Container image override.
    #[serde(default)]
    pub image: Option<String>,
    /// Proposer provider override.
    #[serde(default)]
    pub provider: Option<String>,
    /// Proposer model override.
    #[serde(default)]
    pub model: Option<String>,
    /// Extra environment variables for the job.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl WorkItem {
    /// Construct a work item with only the required fields.
    #[must_use]
    pub fn new(id: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            summary: summary.into(),
            description: String::new(),
            repo_url: None,
            epic_id: None,
            image: None,
            provider: None,
            model: None,
            env: BTreeMap::new(),
        }
    }

    /// Set the repository URL.
    #[must_use]
    pub fn with_repo(mut self, repo_url: impl Into<String>) -> Self {
        self.repo_url = Some(repo_url.into());
        self
    }

    /// Set the parent epic identifier.
    #[must_use]
    pub fn with_epic(mut self, epic_id: impl Into<String>) -> Self {
        self.epic_id = Some(epic_id.into());
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Repository URL, treating an empty string as absent.
    #[must_use]
    pub fn repo(&self) -> Option<&str> {
        self.repo_url.as_deref().filter(|url| !url.trim().is_empty())
    }

    /// Identifier reduced to lowercase ASCII alphanumerics and dashes,
    /// suitable for process names, directory names, and DNS labels.
    /// Distinct ids give distinct names; see [`unique_name`].
    #[must_use]
    pub fn sanitized_id(&self) -> String {
        unique_name(&self.id, MAX_LABEL_LEN)
    }
}

/// Reduce an arbitrary identifier to `[a-z0-9-]`, collapsing runs of
/// other characters into one dash and trimming dashes at both ends.
#[must_use]
pub fn sanitize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_dash = true;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// [`sanitize_name`] capped at `max_len`, with the first eight hex digits
/// of the raw id's SHA-256 appended whenever sanitizing or the cap altered
/// it. `T/1` and `t-1` therefore map to different names. The digest is
/// kept when the cap bites; the sanitized part is shortened instead.
///
/// An id with no usable characters still yields an empty string.
#[must_use]
pub fn unique_name(raw: &str, max_len: usize) -> String {
    let base = sanitize_name(raw);
    if base.is_empty() || (base == raw && base.len() <= max_len) {
        return base;
    }

    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    let digest = &digest[..DIGEST_LEN.min(max_len)];

    let keep = max_len.saturating_sub(DIGEST_LEN + 1);
    let base = base.get(..keep.min(base.len())).unwrap_or_default();
    let base = base.trim_end_matches('-');
    if base.is_empty() {
        digest.to_owned()
    } else {
        format!("{base}-{digest}")
    }
}
