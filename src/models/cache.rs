//! HuggingFace cache layout
//!
//! Owns the on-disk structure shared with other hub clients:
//! ```text
//! <cache_root>/
//! ├── models--Qwen--Qwen2.5-0.5B-Instruct-GGUF/
//! │   ├── refs/
//! │   │   └── main                      (last seen commit id)
//! │   ├── blobs/
//! │   │   ├── {content_key}             (complete, immutable)
//! │   │   └── {content_key}.incomplete  (partial transfer)
//! │   └── snapshots/
//! │       └── {commit}/
//! │           └── qwen2.5-0.5b-instruct-q2_k.gguf -> ../../blobs/{content_key}
//! └── models--org--name/
//!     └── ...
//! ```
//!
//! Path derivation is pure; only [`ModelCache::ensure_layout`],
//! [`ModelCache::reconcile_ref`] and [`ModelCache::invalidate_snapshot`] touch the disk.

use crate::error::CacheLayoutError;
use std::path::{Component, Path, PathBuf};

const INCOMPLETE_SUFFIX: &str = ".incomplete";

/// Get the default hub cache directory
///
/// Checks in order:
/// 1. `$HF_HUB_CACHE`
/// 2. `$HF_HOME/hub`
/// 3. `$XDG_CACHE_HOME/huggingface/hub`
/// 4. `~/.cache/huggingface/hub`
pub fn default_cache_dir() -> PathBuf {
    if let Ok(hub_cache) = std::env::var("HF_HUB_CACHE") {
        return expand_home(Path::new(&hub_cache));
    }

    if let Ok(hf_home) = std::env::var("HF_HOME") {
        return expand_home(Path::new(&hf_home)).join("hub");
    }

    if let Ok(xdg_cache) = std::env::var("XDG_CACHE_HOME") {
        return PathBuf::from(xdg_cache).join("huggingface/hub");
    }

    dirs::home_dir()
        .map(|h| h.join(".cache/huggingface/hub"))
        .unwrap_or_else(|| PathBuf::from("/tmp/huggingface/hub"))
}

/// Expand a leading `~` to the home directory
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

/// Convert repository ID to cache directory name
///
/// e.g., "BAAI/bge-small-en-v1.5" -> "models--BAAI--bge-small-en-v1.5"
pub fn repo_id_to_cache_name(repo_id: &str) -> String {
    format!("models/{}", repo_id).replace('/', "--")
}

/// Convert cache directory name back to repository ID
///
/// e.g., "models--BAAI--bge-small-en-v1.5" -> "BAAI/bge-small-en-v1.5"
pub fn cache_name_to_repo_id(cache_name: &str) -> Option<String> {
    cache_name
        .strip_prefix("models--")
        .filter(|s| !s.is_empty())
        .map(|s| s.replacen("--", "/", 1))
}

/// Whether the locally recorded ref still matches the remote commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefState {
    /// The ref was absent (now written) or already pointed at the commit
    Fresh,
    /// The ref pointed at a different commit; it now points at the new one
    Stale { previous: String },
}

/// One repository's directory inside the cache root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCache {
    root: PathBuf,
}

impl ModelCache {
    /// Derive the repository directory without touching the disk
    pub fn at(cache_root: &Path, repo_id: &str) -> Self {
        Self {
            root: expand_home(cache_root).join(repo_id_to_cache_name(repo_id)),
        }
    }

    /// Create `refs/`, `blobs/` and `snapshots/` if missing
    pub fn ensure_layout(cache_root: &Path, repo_id: &str) -> Result<Self, CacheLayoutError> {
        let cache = Self::at(cache_root, repo_id);
        for dir in [cache.refs_dir(), cache.blobs_dir(), cache.snapshots_dir()] {
            std::fs::create_dir_all(&dir)
                .map_err(|source| CacheLayoutError::CreateDir { path: dir, source })?;
        }
        tracing::debug!(path = ?cache.root, "Cache layout ready");
        Ok(cache)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn refs_dir(&self) -> PathBuf {
        self.root.join("refs")
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.root.join("blobs")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    pub fn ref_path(&self, revision: &str) -> PathBuf {
        self.refs_dir().join(revision)
    }

    pub fn blob_path(&self, content_key: &str) -> PathBuf {
        self.blobs_dir().join(content_key)
    }

    pub fn incomplete_path(&self, content_key: &str) -> PathBuf {
        self.blobs_dir().join(format!("{}{}", content_key, INCOMPLETE_SUFFIX))
    }

    /// `snapshots/<commit>/<relative_file>`
    ///
    /// Rejects empty, absolute, or parent-relative file paths so a remote file
    /// name can never resolve outside the snapshot tree. `.` components are
    /// dropped.
    pub fn snapshot_path(
        &self,
        commit: &str,
        relative_file: &str,
    ) -> Result<PathBuf, CacheLayoutError> {
        validate_segment(commit)?;
        let relative = validate_relative_file(relative_file)?;
        Ok(self.snapshots_dir().join(commit).join(relative))
    }

    /// Read the ref for `revision` and compare it with `new_commit`
    ///
    /// An absent ref is written and reported fresh. A differing ref is
    /// overwritten with `new_commit` and reported stale together with the
    /// previously recorded commit.
    pub fn reconcile_ref(
        &self,
        revision: &str,
        new_commit: &str,
    ) -> Result<RefState, CacheLayoutError> {
        let ref_path = self.ref_path(revision);

        let previous = match std::fs::read_to_string(&ref_path) {
            Ok(content) => Some(content.trim().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(source) => return Err(CacheLayoutError::Ref { path: ref_path, source }),
        };

        match previous {
            Some(previous) if previous == new_commit => Ok(RefState::Fresh),
            previous => {
                if let Some(parent) = ref_path.parent() {
                    std::fs::create_dir_all(parent).map_err(|source| CacheLayoutError::Ref {
                        path: ref_path.clone(),
                        source,
                    })?;
                }
                std::fs::write(&ref_path, new_commit)
                    .map_err(|source| CacheLayoutError::Ref { path: ref_path, source })?;

                match previous {
                    Some(previous) if !previous.is_empty() => Ok(RefState::Stale { previous }),
                    _ => Ok(RefState::Fresh),
                }
            }
        }
    }

    /// Remove one snapshot entry left behind by a previous commit
    ///
    /// Blobs are never removed here; another commit may still link to them.
    /// Returns whether an entry existed.
    pub fn invalidate_snapshot(
        &self,
        commit: &str,
        relative_file: &str,
    ) -> Result<bool, CacheLayoutError> {
        let path = self.snapshot_path(commit, relative_file)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(path = ?path, "Removed stale snapshot entry");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CacheLayoutError::Invalidate { path, source }),
        }
    }
}

fn validate_segment(segment: &str) -> Result<(), CacheLayoutError> {
    if segment.is_empty() || segment == "." || segment == ".." || segment.contains(['/', '\\']) {
        return Err(CacheLayoutError::InvalidPath(segment.to_string()));
    }
    Ok(())
}

fn validate_relative_file(relative_file: &str) -> Result<PathBuf, CacheLayoutError> {
    let invalid = || CacheLayoutError::InvalidPath(relative_file.to_string());

    if relative_file.is_empty() || relative_file.contains('\\') {
        return Err(invalid());
    }

    let mut path = PathBuf::new();
    for component in Path::new(relative_file).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => return Err(invalid()),
        }
    }
    if path.as_os_str().is_empty() {
        return Err(invalid());
    }
    Ok(path)
}

/// Total size of a repository's blobs in bytes
///
/// Only `blobs/` is counted; snapshot entries are links into it.
pub fn repo_cache_size(cache_root: &Path, repo_id: &str) -> Option<u64> {
    let blobs = ModelCache::at(cache_root, repo_id).blobs_dir();
    if !blobs.exists() {
        return None;
    }
    Some(dir_size(&blobs))
}

/// Recursively calculate directory size
fn dir_size(path: &Path) -> u64 {
    let mut size = 0;

    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                size += dir_size(&path);
            } else if let Ok(metadata) = std::fs::symlink_metadata(&path) {
                size += metadata.len();
            }
        }
    }

    size
}

/// List all cached repositories
///
/// Returns repository IDs for every `models--*` directory that has a
/// `snapshots/` tree.
pub fn list_cached_repos(cache_root: &Path) -> Vec<String> {
    let cache_root = expand_home(cache_root);
    let mut repos = Vec::new();

    if let Ok(entries) = std::fs::read_dir(&cache_root) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();

            if let Some(repo_id) = cache_name_to_repo_id(&name)
                && entry.path().join("snapshots").is_dir()
            {
                repos.push(repo_id);
            }
        }
    }

    repos.sort();
    repos
}
