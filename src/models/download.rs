//! Single-file download pipeline
//!
//! resolve metadata -> ensure cache layout -> reconcile ref ->
//! reuse blob or transfer -> verify -> finalize into the snapshot tree.

use super::cache::{ModelCache, RefState};
use super::finalize::{finalize, link_snapshot};
use super::metadata::{FileMetadata, MetadataResolver};
use super::shards::fetch_possibly_sharded;
use super::transfer::{ProgressSink, TransferEngine, TransferOutcome};
use crate::client::HubClient;
use crate::config::FetchConfig;
use crate::error::{FetchError, FetchResult, MetadataError, TransferError};
use crate::metrics;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Outcome of a download as reported to a process caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadResult {
    pub success: bool,
    /// Snapshot path on success, partial blob path on cancellation
    pub path: PathBuf,
    /// Interrupted on request rather than failed
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<&FetchResult<PathBuf>> for DownloadResult {
    fn from(result: &FetchResult<PathBuf>) -> Self {
        match result {
            Ok(path) => Self {
                success: true,
                path: path.clone(),
                cancelled: false,
                reason: None,
            },
            Err(e) => Self {
                success: false,
                path: cancelled_path(e).unwrap_or_default(),
                cancelled: e.is_cancelled(),
                reason: Some(e.to_string()),
            },
        }
    }
}

fn cancelled_path(error: &FetchError) -> Option<PathBuf> {
    match error {
        FetchError::Cancelled { path } => Some(path.clone()),
        FetchError::Shard { source, .. } => cancelled_path(source),
        _ => None,
    }
}

/// Downloads repository files into the local cache
#[derive(Debug, Clone)]
pub struct Downloader {
    config: FetchConfig,
    client: HubClient,
    resolver: MetadataResolver,
    engine: TransferEngine,
}

impl Downloader {
    pub fn new(config: FetchConfig) -> FetchResult<Self> {
        let client = HubClient::new(&config)?;
        let resolver = MetadataResolver::new(client.clone());
        let engine = TransferEngine::new(client.clone(), config.progress_interval());

        Ok(Self {
            config,
            client,
            resolver,
            engine,
        })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Resolve a file's identity without downloading it
    pub async fn resolve(&self, repo_id: &str, file: &str) -> Result<FileMetadata, MetadataError> {
        self.resolver.resolve(repo_id, file).await
    }

    /// Download one file and return its snapshot path
    ///
    /// An existing blob is reused unless `force` is set. A partial blob left
    /// by an earlier failed or cancelled call is resumed unless `force` is set.
    /// The revision ref moves to the resolved commit only after its snapshot
    /// entry is in place.
    ///
    /// There is no file locking. Only one download per `(repo_id, content key)`
    /// may run against a cache root at a time: two writers, in this process or
    /// another, would append to the same `.incomplete` file and corrupt it.
    pub async fn download(
        &self,
        repo_id: &str,
        file: &str,
        force: bool,
        cancel: &CancellationToken,
        progress: &mut dyn ProgressSink,
    ) -> FetchResult<PathBuf> {
        let result = self
            .download_inner(repo_id, file, force, cancel, progress)
            .await;

        match &result {
            Ok(_) => {}
            Err(e) if e.is_cancelled() => metrics::record_download(repo_id, "cancelled"),
            Err(e) => {
                tracing::error!(repo_id = %repo_id, file = %file, error = %e, "Download failed");
                metrics::record_download(repo_id, "failed");
            }
        }

        result
    }

    /// Download `filename`, expanding shard names into their whole set
    pub async fn download_with_shards(
        &self,
        repo_id: &str,
        filename: &str,
        force: bool,
        cancel: &CancellationToken,
        progress: &mut dyn ProgressSink,
    ) -> FetchResult<PathBuf> {
        fetch_possibly_sharded(self, repo_id, filename, force, cancel, progress).await
    }

    async fn download_inner(
        &self,
        repo_id: &str,
        file: &str,
        force: bool,
        cancel: &CancellationToken,
        progress: &mut dyn ProgressSink,
    ) -> FetchResult<PathBuf> {
        let metadata = self.resolver.resolve(repo_id, file).await?;
        tracing::debug!(
            repo_id = %repo_id,
            file = %file,
            commit = %metadata.commit,
            content_key = %metadata.content_key,
            size = ?metadata.size,
            "Resolved file metadata"
        );

        let cache = ModelCache::ensure_layout(&self.config.cache_dir, repo_id)?;
        let blob = cache.blob_path(&metadata.content_key);
        let incomplete = cache.incomplete_path(&metadata.content_key);
        let snapshot = cache.snapshot_path(&metadata.commit, file)?;

        if blob.exists() && !force {
            tracing::info!(
                repo_id = %repo_id,
                file = %file,
                "Blob already cached, skipping download"
            );
            if std::fs::symlink_metadata(&snapshot).is_err() {
                link_snapshot(&blob, &snapshot)?;
            }
            self.record_commit(&cache, repo_id, file, &metadata.commit)?;
            metrics::record_cache_hit(repo_id);
            metrics::record_download(repo_id, "cached");
            return Ok(snapshot);
        }

        tracing::info!(repo_id = %repo_id, file = %file, "Downloading");
        let url = self.client.resolve_url(repo_id, &metadata.commit, file);
        let outcome = self
            .engine
            .fetch(
                &url,
                &incomplete,
                !force,
                metadata.expected_size(),
                cancel,
                progress,
            )
            .await?;

        if let TransferOutcome::Cancelled { .. } = outcome {
            return Err(FetchError::Cancelled { path: incomplete });
        }

        if self.config.verify_checksums && metadata.is_sha256() {
            verify_sha256(&incomplete, &metadata.content_key).await?;
        }

        finalize(&incomplete, &blob, &snapshot)?;
        self.record_commit(&cache, repo_id, file, &metadata.commit)?;

        tracing::info!(path = ?snapshot, "Downloaded");
        metrics::record_download(repo_id, "ok");
        Ok(snapshot)
    }

    /// Point the revision ref at `commit` once its snapshot entry exists
    ///
    /// Runs only after the new entry is linked, so a failed or cancelled
    /// download leaves the previous ref and snapshot untouched.
    fn record_commit(
        &self,
        cache: &ModelCache,
        repo_id: &str,
        file: &str,
        commit: &str,
    ) -> FetchResult<()> {
        if let RefState::Stale { previous } = cache.reconcile_ref(&self.config.revision, commit)? {
            tracing::info!(
                repo_id = %repo_id,
                previous = %previous,
                commit = %commit,
                "Revision moved, dropping stale snapshot entry"
            );
            cache.invalidate_snapshot(&previous, file)?;
        }
        Ok(())
    }
}

/// Hash a finished transfer and drop it when it does not match `expected`
async fn verify_sha256(path: &Path, expected: &str) -> FetchResult<()> {
    let owned = path.to_path_buf();
    let actual = tokio::task::spawn_blocking(move || sha256_file(&owned))
        .await
        .map_err(|e| io_failure(path, std::io::Error::other(e)))?
        .map_err(|e| io_failure(path, e))?;

    if !actual.eq_ignore_ascii_case(expected) {
        tracing::warn!(
            path = ?path,
            expected = %expected,
            actual = %actual,
            "Checksum mismatch, discarding partial blob"
        );
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(path = ?path, error = %e, "Failed to remove corrupt partial blob");
        }
        return Err(FetchError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        });
    }

    Ok(())
}

fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn io_failure(path: &Path, source: std::io::Error) -> FetchError {
    FetchError::Transfer(TransferError::Io {
        path: path.to_path_buf(),
        source,
    })
}
