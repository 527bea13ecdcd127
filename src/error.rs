//! Error types for the download pipeline
//!
//! Each layer has its own error enum so callers can tell which stage failed.
//! [`FetchError`] aggregates them for the per-file and sharded entry points.

use std::path::PathBuf;
use thiserror::Error;

/// Failures while resolving a file's identity on the hub
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Metadata request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Metadata request to {url} returned status {status}")]
    Status { status: u16, url: String },

    #[error("File not found in repository: {path}")]
    NotFound { path: String },

    #[error("Malformed metadata response: {0}")]
    Malformed(String),

    #[error("Metadata response is missing {0}")]
    MissingField(&'static str),
}

/// Failures while creating or reading the on-disk cache layout
#[derive(Debug, Error)]
pub enum CacheLayoutError {
    #[error("Failed to create cache directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid repository file path: {0}")]
    InvalidPath(String),

    #[error("Failed to access ref file {path:?}: {source}")]
    Ref {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to remove stale snapshot entry {path:?}: {source}")]
    Invalidate {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Failures while streaming bytes into an `.incomplete` blob
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Transfer failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Transfer from {url} returned status {status}")]
    Status { status: u16, url: String },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Transfer ended with {actual} bytes, expected {expected}")]
    SizeMismatch { expected: u64, actual: u64 },
}

/// Failures while promoting a finished transfer into the blob store
#[derive(Debug, Error)]
pub enum FinalizationError {
    #[error("Failed to rename {from:?} to {to:?}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to link {link:?} to {target:?}: {source}")]
    Link {
        link: PathBuf,
        target: PathBuf,
        source: std::io::Error,
    },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Error returned by [`crate::Downloader`] operations
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Configured token is not a valid HTTP header value")]
    InvalidToken,

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    CacheLayout(#[from] CacheLayoutError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Finalization(#[from] FinalizationError),

    #[error("Download cancelled, partial data kept at {path:?}")]
    Cancelled { path: PathBuf },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Shard {file} failed: {source}")]
    Shard {
        file: String,
        #[source]
        source: Box<FetchError>,
    },
}

impl FetchError {
    /// Whether this error is a cooperative interrupt rather than a failure
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled { .. } => true,
            Self::Shard { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

pub type FetchResult<T> = Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_is_not_failure() {
        let err = FetchError::Cancelled {
            path: PathBuf::from("/tmp/blob.incomplete"),
        };
        assert!(err.is_cancelled());

        let err = FetchError::Transfer(TransferError::SizeMismatch {
            expected: 10,
            actual: 4,
        });
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_shard_wrapping_keeps_cancellation() {
        let err = FetchError::Shard {
            file: "model-00002-of-00003.gguf".to_string(),
            source: Box::new(FetchError::Cancelled {
                path: PathBuf::from("x.incomplete"),
            }),
        };
        assert!(err.is_cancelled());
        assert!(err.to_string().contains("model-00002-of-00003.gguf"));
    }
}
