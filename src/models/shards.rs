//! Multi-part file names and sequential shard downloads
//!
//! Large weights are split as `<base>-<NNNNN>-of-<MMMMM>.<ext>`, with both
//! numbers zero-padded to five digits and counted from 1.

use super::download::Downloader;
use super::transfer::ProgressSink;
use crate::error::{FetchError, FetchResult};
use std::fmt;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

const DIGITS: usize = 5;
const SEPARATOR: &str = "-of-";

/// A file name following the shard grammar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardName {
    pub base: String,
    pub index: u32,
    pub count: u32,
    pub extension: String,
}

impl ShardName {
    /// Parse `model-00002-of-00005.gguf`; anything else is `None`
    pub fn parse(file_name: &str) -> Option<Self> {
        let (stem, extension) = file_name.rsplit_once('.')?;
        if extension.is_empty()
            || !extension
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            return None;
        }

        // stem = <base>-NNNNN-of-MMMMM
        let suffix_len = 1 + DIGITS + SEPARATOR.len() + DIGITS;
        if stem.len() <= suffix_len || !stem.is_char_boundary(stem.len() - suffix_len) {
            return None;
        }
        let (base, suffix) = stem.split_at(stem.len() - suffix_len);
        let suffix = suffix.strip_prefix('-')?;
        let (index, count) = suffix.split_once(SEPARATOR)?;

        let index = parse_digits(index)?;
        let count = parse_digits(count)?;
        if index == 0 || count == 0 || index > count || base.is_empty() {
            return None;
        }

        Some(Self {
            base: base.to_string(),
            index,
            count,
            extension: extension.to_string(),
        })
    }

    /// File name of shard `index` in the same set
    pub fn file_name(&self, index: u32) -> String {
        format!(
            "{}-{:0width$}-of-{:0width$}.{}",
            self.base,
            index,
            self.count,
            self.extension,
            width = DIGITS
        )
    }

    /// All shard file names in index order
    pub fn all(&self) -> impl Iterator<Item = String> + '_ {
        (1..=self.count).map(|index| self.file_name(index))
    }
}

impl fmt::Display for ShardName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name(self.index))
    }
}

fn parse_digits(s: &str) -> Option<u32> {
    if s.len() != DIGITS || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Download `filename`, or every shard of its set when it names a shard
///
/// Shards are fetched one after another in index order. The first failure
/// (or cancellation) stops the run and is returned with the shard's name.
/// On success the path of shard 1 is returned.
pub async fn fetch_possibly_sharded(
    downloader: &Downloader,
    repo_id: &str,
    filename: &str,
    force: bool,
    cancel: &CancellationToken,
    progress: &mut dyn ProgressSink,
) -> FetchResult<PathBuf> {
    let Some(shard) = ShardName::parse(filename) else {
        return downloader
            .download(repo_id, filename, force, cancel, progress)
            .await;
    };

    tracing::info!(
        repo_id = %repo_id,
        base = %shard.base,
        shard_count = shard.count,
        "Downloading sharded file"
    );

    let first_name = shard.file_name(1);
    let first = downloader
        .download(repo_id, &first_name, force, cancel, progress)
        .await
        .map_err(|e| shard_error(shard.file_name(1), e))?;

    for file in shard.all().skip(1) {
        tracing::debug!(repo_id = %repo_id, shard = %file, "Downloading shard");
        if let Err(e) = downloader
            .download(repo_id, &file, force, cancel, progress)
            .await
        {
            return Err(shard_error(file, e));
        }
    }

    Ok(first)
}

fn shard_error(file: String, source: FetchError) -> FetchError {
    FetchError::Shard {
        file,
        source: Box::new(source),
    }
}
