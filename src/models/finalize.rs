//! Promotion of finished transfers into the blob store
//!
//! Both the `.incomplete` file and its blob live in the same `blobs/`
//! directory, so the rename stays on one filesystem and is atomic. Relinking
//! the snapshot entry is not: between removing the old entry and creating the
//! new link the path briefly does not exist.

use crate::error::FinalizationError;
use std::path::{Component, Path, PathBuf};

/// Rename `incomplete` to `blob` and point `snapshot` at it
pub fn finalize(incomplete: &Path, blob: &Path, snapshot: &Path) -> Result<(), FinalizationError> {
    std::fs::rename(incomplete, blob).map_err(|source| FinalizationError::Rename {
        from: incomplete.to_path_buf(),
        to: blob.to_path_buf(),
        source,
    })?;
    tracing::debug!(blob = ?blob, "Blob promoted");

    link_snapshot(blob, snapshot)
}

/// Replace whatever is at `snapshot` with a link to `blob`
pub fn link_snapshot(blob: &Path, snapshot: &Path) -> Result<(), FinalizationError> {
    if let Some(parent) = snapshot.parent() {
        std::fs::create_dir_all(parent).map_err(|source| FinalizationError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    // symlink_metadata also sees dangling links, which exists() does not
    match std::fs::symlink_metadata(snapshot) {
        Ok(_) => {
            tracing::debug!(snapshot = ?snapshot, "Replacing existing snapshot entry");
            std::fs::remove_file(snapshot).map_err(|source| FinalizationError::Io {
                path: snapshot.to_path_buf(),
                source,
            })?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(FinalizationError::Io {
                path: snapshot.to_path_buf(),
                source,
            });
        }
    }

    create_link(blob, snapshot).map_err(|source| FinalizationError::Link {
        link: snapshot.to_path_buf(),
        target: blob.to_path_buf(),
        source,
    })
}

#[cfg(unix)]
fn create_link(blob: &Path, snapshot: &Path) -> std::io::Result<()> {
    let target = snapshot
        .parent()
        .and_then(|dir| relative_path(dir, blob))
        .unwrap_or_else(|| blob.to_path_buf());
    std::os::unix::fs::symlink(target, snapshot)
}

#[cfg(windows)]
fn create_link(blob: &Path, snapshot: &Path) -> std::io::Result<()> {
    // Symlinks need developer mode or elevation on Windows
    std::os::windows::fs::symlink_file(blob, snapshot)
        .or_else(|_| std::fs::hard_link(blob, snapshot))
        .or_else(|_| std::fs::copy(blob, snapshot).map(|_| ()))
}

/// Path of `target` relative to the directory `from`
///
/// Returns `None` when the two paths share no common root.
fn relative_path(from: &Path, target: &Path) -> Option<PathBuf> {
    let from: Vec<Component> = from.components().collect();
    let target: Vec<Component> = target.components().collect();

    if from.first() != target.first() {
        return None;
    }

    let common = from
        .iter()
        .zip(target.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..from.len() {
        relative.push("..");
    }
    for component in &target[common..] {
        relative.push(component.as_os_str());
    }
    Some(relative)
}
