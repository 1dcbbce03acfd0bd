//! Workspace file edits: path validation, atomic writes, and patches.
//!
//! Every target path is resolved against the workspace root. `..`
//! traversal, absolute paths outside the root, symlink escapes, and writes
//! into `.git` are rejected with `AppError::PathViolation`.

use std::io::Write;
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;

use crate::{AppError, Result};

/// Result of an edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditSummary {
    /// Absolute path of the edited file.
    pub path: PathBuf,
    /// Whether the file content changed.
    pub changed: bool,
}

/// Validate that `candidate` resides within `workspace_root` and return
/// its absolute path.
///
/// # Errors
///
/// Returns `AppError::PathViolation` if the root cannot be canonicalized or
/// the candidate escapes it.
pub fn validate_workspace_path(workspace_root: &Path, candidate: impl AsRef<Path>) -> Result<PathBuf> {
    let root = workspace_root
        .canonicalize()
        .map_err(|err| AppError::PathViolation(format!("workspace root invalid: {err}")))?;

    let candidate = candidate.as_ref();
    let relative = if candidate.is_absolute() {
        candidate
            .strip_prefix(&root)
            .map_err(|_| AppError::PathViolation("path outside workspace".into()))?
    } else {
        candidate
    };

    let mut normalized = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(AppError::PathViolation(
                        "path attempts to escape workspace".into(),
                    ));
                }
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => {
                return Err(AppError::PathViolation("path outside workspace".into()));
            }
            Component::Normal(part) => normalized.push(part),
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(AppError::PathViolation("path names the workspace root".into()));
    }
    if normalized.components().next() == Some(Component::Normal(".git".as_ref())) {
        return Err(AppError::PathViolation("cannot modify git metadata".into()));
    }

    let absolute = root.join(normalized);
    if absolute.exists() {
        let canonical = absolute
            .canonicalize()
            .map_err(|err| AppError::PathViolation(format!("cannot resolve path: {err}")))?;
        if !canonical.starts_with(&root) {
            return Err(AppError::PathViolation(
                "symlink target escapes workspace".into(),
            ));
        }
        Ok(canonical)
    } else {
        Ok(absolute)
    }
}

/// Write `bytes` to `path` through a temporary file in the same directory.
///
/// # Errors
///
/// Returns `AppError::Io` if the directory, temp file, or rename fails.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| AppError::Io(format!("{} has no parent directory", path.display())))?;
    std::fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path)
        .map_err(|err| AppError::Io(format!("failed to persist {}: {err}", path.display())))?;
    Ok(())
}

/// Replace a workspace file's content.
///
/// # Errors
///
/// Returns `AppError::PathViolation` for paths outside the workspace or
/// `AppError::Io` if the write fails.
pub fn write_file(workspace_root: &Path, file_path: &str, content: &str) -> Result<EditSummary> {
    let path = validate_workspace_path(workspace_root, file_path)?;
    let unchanged = std::fs::read(&path).is_ok_and(|existing| existing == content.as_bytes());
    if !unchanged {
        write_atomic(&path, content.as_bytes())?;
    }
    Ok(EditSummary {
        path,
        changed: !unchanged,
    })
}

/// Apply a unified diff to an existing workspace file.
///
/// # Errors
///
/// Returns `AppError::PathViolation` for paths outside the workspace, or
/// `AppError::Diff` if the file cannot be read or the patch does not parse
/// or apply cleanly.
pub fn apply_patch(workspace_root: &Path, file_path: &str, unified_diff: &str) -> Result<EditSummary> {
    let path = validate_workspace_path(workspace_root, file_path)?;
    let current = std::fs::read_to_string(&path).map_err(|err| {
        AppError::Diff(format!("failed to read {} for patching: {err}", path.display()))
    })?;

    // diffy matches context lines literally, so compare in LF form.
    let has_crlf = current.contains("\r\n");
    let current_lf = current.replace("\r\n", "\n");
    let diff_lf = unified_diff.replace("\r\n", "\n");

    let patch = diffy::Patch::from_str(&diff_lf)
        .map_err(|err| AppError::Diff(format!("invalid unified diff: {err}")))?;
    let patched = diffy::apply(&current_lf, &patch)
        .map_err(|err| AppError::Diff(format!("patch does not apply: {err}")))?;
    let output = if has_crlf {
        patched.replace('\n', "\r\n")
    } else {
        patched
    };

    let changed = output != current;
    if changed {
        write_atomic(&path, output.as_bytes())?;
    }
    Ok(EditSummary { path, changed })
}
