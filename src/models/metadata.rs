//! File metadata resolution
//!
//! Asks the hub which commit and content key a repository file currently
//! resolves to. The structured `paths-info` API is tried first; hubs that do
//! not expose it are queried through the raw file, whose body is a git-lfs
//! pointer for large files.

use crate::client::HubClient;
use crate::error::MetadataError;
use reqwest::StatusCode;
use reqwest::header::{ETAG, HeaderMap};
use serde::{Deserialize, Serialize};

const COMMIT_HEADER: &str = "x-repo-commit";

/// Identity of one repository file at a commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Commit id the snapshot entry is filed under
    pub commit: String,
    /// sha256 for LFS-tracked files, git object id otherwise
    pub content_key: String,
    /// Byte length, when the hub reports it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Entry type reported by the hub (e.g. "file")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Git object id, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oid: Option<String>,
}

impl FileMetadata {
    /// Whether the content key is a sha256 digest that can be verified locally
    pub fn is_sha256(&self) -> bool {
        is_hex_of_len(&self.content_key, 64)
    }

    /// Size when known and non-zero
    pub fn expected_size(&self) -> Option<u64> {
        self.size.filter(|size| *size > 0)
    }
}

/// One entry of a `paths-info` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PathInfo {
    #[serde(rename = "type")]
    kind: Option<String>,
    path: Option<String>,
    oid: Option<String>,
    size: Option<u64>,
    lfs: Option<LfsInfo>,
    last_commit: Option<LastCommit>,
}

#[derive(Debug, Deserialize)]
struct LfsInfo {
    oid: Option<String>,
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct LastCommit {
    id: Option<String>,
}

/// Queries the hub for [`FileMetadata`]
#[derive(Debug, Clone)]
pub struct MetadataResolver {
    client: HubClient,
}

impl MetadataResolver {
    pub fn new(client: HubClient) -> Self {
        Self { client }
    }

    /// Resolve a file's commit, content key and size
    ///
    /// Transport failures are returned as-is. Any other failure of the
    /// structured query falls back to the pointer protocol.
    pub async fn resolve(&self, repo_id: &str, file: &str) -> Result<FileMetadata, MetadataError> {
        match self.resolve_structured(repo_id, file).await {
            Ok(metadata) => Ok(metadata),
            Err(MetadataError::Network(e)) => Err(MetadataError::Network(e)),
            Err(e) => {
                tracing::debug!(
                    repo_id = %repo_id,
                    file = %file,
                    error = %e,
                    "paths-info unavailable, falling back to pointer metadata"
                );
                self.resolve_pointer(repo_id, file).await
            }
        }
    }

    /// `paths-info` query
    pub async fn resolve_structured(
        &self,
        repo_id: &str,
        file: &str,
    ) -> Result<FileMetadata, MetadataError> {
        let url = self.client.paths_info_url(repo_id);
        let body = serde_json::json!({ "paths": [file], "expand": true });

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MetadataError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let text = response.text().await?;
        parse_paths_info(&text, file)
    }

    /// Raw-file query; the body is a git-lfs pointer for large files
    pub async fn resolve_pointer(
        &self,
        repo_id: &str,
        file: &str,
    ) -> Result<FileMetadata, MetadataError> {
        let url = self.client.raw_url(repo_id, file);
        let response = self.client.get(&url).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(MetadataError::NotFound {
                path: file.to_string(),
            });
        }
        if !status.is_success() {
            return Err(MetadataError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let headers = response.headers().clone();
        let body = response.text().await?;
        parse_pointer_response(&headers, &body)
    }
}

/// Parse a `paths-info` response body and pick the entry for `file`
fn parse_paths_info(json: &str, file: &str) -> Result<FileMetadata, MetadataError> {
    let entries: Vec<PathInfo> =
        serde_json::from_str(json).map_err(|e| MetadataError::Malformed(e.to_string()))?;

    let entry = entries
        .into_iter()
        .find(|entry| entry.path.as_deref().is_none_or(|path| path == file))
        .ok_or_else(|| MetadataError::NotFound {
            path: file.to_string(),
        })?;

    let commit = entry
        .last_commit
        .and_then(|commit| commit.id)
        .filter(|id| !id.is_empty())
        .ok_or(MetadataError::MissingField("lastCommit.id"))?;

    let lfs_oid = entry
        .lfs
        .as_ref()
        .and_then(|lfs| lfs.oid.clone())
        .filter(|oid| is_hex_of_len(oid, 64));

    let content_key = lfs_oid
        .or_else(|| entry.oid.clone())
        .filter(|key| is_valid_key(key))
        .ok_or(MetadataError::MissingField("oid"))?;

    let size = entry.lfs.as_ref().and_then(|lfs| lfs.size).or(entry.size);

    Ok(FileMetadata {
        commit,
        content_key,
        size,
        kind: entry.kind,
        oid: entry.oid,
    })
}

/// Parse a raw-file response: LFS pointer body, commit header, ETag fallback
fn parse_pointer_response(headers: &HeaderMap, body: &str) -> Result<FileMetadata, MetadataError> {
    let commit = headers
        .get(COMMIT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(MetadataError::MissingField("x-repo-commit header"))?;

    let (pointer_oid, pointer_size) = parse_lfs_pointer(body);

    let etag = headers
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(normalize_etag);

    let (content_key, size) = match pointer_oid {
        Some(oid) => (Some(oid), pointer_size),
        // Not an LFS pointer: the body is the file itself
        None => (etag.clone(), Some(body.len() as u64)),
    };

    let content_key = content_key
        .filter(|key| is_valid_key(key))
        .ok_or(MetadataError::MissingField("content key"))?;

    Ok(FileMetadata {
        commit,
        content_key,
        size,
        kind: Some("file".to_string()),
        oid: etag,
    })
}

/// Extract `oid sha256:<hex>` and `size <n>` from a git-lfs pointer
pub fn parse_lfs_pointer(body: &str) -> (Option<String>, Option<u64>) {
    let mut oid = None;
    let mut size = None;

    for line in body.lines() {
        let line = line.trim();
        if let Some(hash) = line.strip_prefix("oid sha256:") {
            oid = Some(hash.trim().to_ascii_lowercase());
        } else if let Some(n) = line.strip_prefix("size ") {
            size = n.trim().parse().ok();
        }
    }

    (oid, size)
}

fn normalize_etag(raw: &str) -> String {
    raw.trim().trim_start_matches("W/").trim_matches('"').to_string()
}

fn is_hex_of_len(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Content keys become file names under `blobs/`
fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && key.len() <= 128 && key.bytes().all(|b| b.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    const SHA: &str = "6a1a3e0b0b0b4c4d4e4f505152535455565758595a5b5c5d5e5f606162636465";
    const COMMIT: &str = "9f0a8ad5b2e1c3d4e5f60718293a4b5c6d7e8f90";

    #[test]
    fn test_parse_paths_info_lfs() {
        let json = format!(
            r#"[{{
                "type": "file",
                "oid": "0123456789abcdef0123456789abcdef01234567",
                "size": 1234,
                "lfs": {{"oid": "{SHA}", "size": 99999, "pointerSize": 134}},
                "path": "model.gguf",
                "lastCommit": {{
                    "id": "{COMMIT}",
                    "title": "upload",
                    "date": "2024-01-01T00:00:00.000Z"
                }}
            }}]"#
        );

        let metadata = parse_paths_info(&json, "model.gguf").unwrap();
        assert_eq!(metadata.commit, COMMIT);
        assert_eq!(metadata.content_key, SHA);
        assert_eq!(metadata.size, Some(99999));
        assert_eq!(metadata.kind.as_deref(), Some("file"));
        assert!(metadata.is_sha256());
    }

    #[test]
    fn test_parse_paths_info_plain_file_uses_oid() {
        let json = format!(
            r#"[{{"type": "file", "oid": "0123456789abcdef0123456789abcdef01234567",
                  "size": 42, "path": "config.json", "lastCommit": {{"id": "{COMMIT}"}}}}]"#
        );

        let metadata = parse_paths_info(&json, "config.json").unwrap();
        assert_eq!(metadata.content_key, "0123456789abcdef0123456789abcdef01234567");
        assert_eq!(metadata.size, Some(42));
        assert!(!metadata.is_sha256());
    }

    #[test]
    fn test_parse_paths_info_errors() {
        assert!(matches!(
            parse_paths_info("[]", "model.gguf"),
            Err(MetadataError::NotFound { .. })
        ));
        assert!(matches!(
            parse_paths_info("not json", "model.gguf"),
            Err(MetadataError::Malformed(_))
        ));
        assert!(matches!(
            parse_paths_info(r#"[{"path": "model.gguf", "oid": "abc"}]"#, "model.gguf"),
            Err(MetadataError::MissingField("lastCommit.id"))
        ));
        assert!(matches!(
            parse_paths_info(
                r#"[{"path": "model.gguf", "lastCommit": {"id": "abc"}}]"#,
                "model.gguf"
            ),
            Err(MetadataError::MissingField("oid"))
        ));
    }

    #[test]
    fn test_parse_lfs_pointer() {
        let body = format!(
            "version https://git-lfs.github.com/spec/v1\noid sha256:{SHA}\nsize 4920734720\n"
        );
        let (oid, size) = parse_lfs_pointer(&body);
        assert_eq!(oid.as_deref(), Some(SHA));
        assert_eq!(size, Some(4_920_734_720));

        assert_eq!(parse_lfs_pointer("{\"model_type\": \"bert\"}"), (None, None));
    }

    #[test]
    fn test_parse_pointer_response() {
        let mut headers = HeaderMap::new();
        headers.insert(COMMIT_HEADER, HeaderValue::from_static(COMMIT));
        let body =
            format!("version https://git-lfs.github.com/spec/v1\noid sha256:{SHA}\nsize 10\n");

        let metadata = parse_pointer_response(&headers, &body).unwrap();
        assert_eq!(metadata.commit, COMMIT);
        assert_eq!(metadata.content_key, SHA);
        assert_eq!(metadata.size, Some(10));
    }

    #[test]
    fn test_parse_pointer_response_etag_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(COMMIT_HEADER, HeaderValue::from_static(COMMIT));
        headers.insert(
            ETAG,
            HeaderValue::from_static("W/\"0123456789abcdef0123456789abcdef01234567\""),
        );

        let metadata = parse_pointer_response(&headers, "{\"a\": 1}").unwrap();
        assert_eq!(metadata.content_key, "0123456789abcdef0123456789abcdef01234567");
        assert_eq!(metadata.size, Some(8));
    }

    #[test]
    fn test_parse_pointer_response_missing_commit() {
        let body = format!("oid sha256:{SHA}\nsize 10\n");
        assert!(matches!(
            parse_pointer_response(&HeaderMap::new(), &body),
            Err(MetadataError::MissingField(_))
        ));
    }

    #[test]
    fn test_invalid_key_rejected() {
        assert!(!is_valid_key("../../etc"));
        assert!(!is_valid_key(""));
        assert!(is_valid_key(SHA));
    }
}
