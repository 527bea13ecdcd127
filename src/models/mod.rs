//! Hub file retrieval into the local cache
//!
//! Provides functionality for:
//! - Resolving a file's commit and content key on the hub
//! - Deriving and creating the `refs/`, `blobs/`, `snapshots/` layout
//! - Resumable, cancellable transfers into `.incomplete` blobs
//! - Promoting finished blobs and linking them into snapshots
//! - Expanding shard names into sequential downloads

pub mod cache;
pub mod download;
pub mod finalize;
pub mod metadata;
pub mod shards;
pub mod transfer;

pub use cache::{ModelCache, RefState, default_cache_dir, list_cached_repos, repo_cache_size};
pub use download::{DownloadResult, Downloader};
pub use metadata::{FileMetadata, MetadataResolver};
pub use shards::{ShardName, fetch_possibly_sharded};
pub use transfer::{NoProgress, ProgressEvent, ProgressSink, TransferEngine, TransferOutcome};
