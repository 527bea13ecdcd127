//! hf-cache-fetch - resumable hub downloads into a shared local cache
//!
//! Fetches single files (or whole shard sets) from a Hugging Face compatible
//! hub into the standard `models--{org}--{name}` cache layout, reusing blobs
//! that are already present and resuming partial transfers.

pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;

pub use client::HubClient;
pub use config::FetchConfig;
pub use error::{FetchError, FetchResult};
pub use models::{
    DownloadResult, Downloader, FileMetadata, ModelCache, NoProgress, ProgressEvent, ProgressSink,
    ShardName,
};
pub use tokio_util::sync::CancellationToken;
