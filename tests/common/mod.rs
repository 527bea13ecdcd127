//! In-process mock hub for integration tests
//!
//! Serves the three endpoints the downloader talks to:
//! - `POST /api/models/{org}/{name}/paths-info/{revision}`
//! - `GET /{org}/{name}/raw/{revision}/{path}`
//! - `GET /{org}/{name}/resolve/{commit}/{path}` (with optional Range support)

#![allow(dead_code)]

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use hf_cache_fetch::FetchConfig;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::convert::Infallible;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const REPO: &str = "org/name";
pub const COMMIT_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
pub const COMMIT_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

/// One file known to the mock hub
#[derive(Debug, Clone)]
pub struct MockFile {
    pub content: Vec<u8>,
    pub commit: String,
    pub lfs: bool,
    /// Advertise this sha256 instead of the real one
    pub advertised_sha: Option<String>,
    /// Advertise this size instead of the real one
    pub advertised_size: Option<usize>,
}

impl MockFile {
    pub fn lfs(content: Vec<u8>, commit: &str) -> Self {
        Self {
            content,
            commit: commit.to_string(),
            lfs: true,
            advertised_sha: None,
            advertised_size: None,
        }
    }

    pub fn plain(content: Vec<u8>, commit: &str) -> Self {
        Self {
            lfs: false,
            ..Self::lfs(content, commit)
        }
    }

    pub fn sha256(&self) -> String {
        self.advertised_sha
            .clone()
            .unwrap_or_else(|| sha256_hex(&self.content))
    }

    /// Stand-in for a git blob id: 40 hex chars derived from the content
    pub fn oid(&self) -> String {
        sha256_hex(&self.content)[..40].to_string()
    }

    pub fn size(&self) -> usize {
        self.advertised_size.unwrap_or(self.content.len())
    }

    pub fn content_key(&self) -> String {
        if self.lfs { self.sha256() } else { self.oid() }
    }
}

#[derive(Debug, Clone)]
pub struct HubOptions {
    pub paths_info: bool,
    pub honor_ranges: bool,
    pub chunk_size: usize,
    pub chunk_delay: Option<Duration>,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            paths_info: true,
            honor_ranges: true,
            chunk_size: 4096,
            chunk_delay: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct HubState {
    files: Mutex<HashMap<String, MockFile>>,
    options: Mutex<HubOptions>,
    /// Resolve requests in arrival order, with their Range header
    resolves: Mutex<Vec<(String, Option<String>)>>,
    metadata_requests: AtomicUsize,
    last_authorization: Mutex<Option<String>>,
}

pub struct MockHub {
    pub endpoint: String,
    pub state: Arc<HubState>,
    server: tokio::task::JoinHandle<()>,
}

impl Drop for MockHub {
    fn drop(&mut self) {
        self.server.abort();
    }
}

impl MockHub {
    pub async fn start(options: HubOptions) -> Self {
        let state = Arc::new(HubState {
            options: Mutex::new(options),
            ..Default::default()
        });

        let app = Router::new().fallback(handle).with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock hub");
        let addr = listener.local_addr().expect("Mock hub has no address");

        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            endpoint: format!("http://{}", addr),
            state,
            server,
        }
    }

    pub fn put(&self, path: &str, file: MockFile) {
        self.state
            .files
            .lock()
            .unwrap()
            .insert(path.to_string(), file);
    }

    pub fn set_options(&self, options: HubOptions) {
        *self.state.options.lock().unwrap() = options;
    }

    pub fn resolves(&self) -> Vec<(String, Option<String>)> {
        self.state.resolves.lock().unwrap().clone()
    }

    pub fn resolve_count(&self) -> usize {
        self.state.resolves.lock().unwrap().len()
    }

    pub fn metadata_requests(&self) -> usize {
        self.state.metadata_requests.load(Ordering::SeqCst)
    }

    pub fn last_authorization(&self) -> Option<String> {
        self.state.last_authorization.lock().unwrap().clone()
    }

    /// Downloader configuration pointing at this hub
    pub fn config(&self, cache_dir: &Path) -> FetchConfig {
        FetchConfig {
            endpoint: self.endpoint.clone(),
            cache_dir: cache_dir.to_path_buf(),
            token: None,
            progress_interval_ms: 0,
            ..Default::default()
        }
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Deterministic test payload
pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

async fn handle(
    State(hub): State<Arc<HubState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    *hub.last_authorization.lock().unwrap() = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let path = urlencoding::decode(uri.path())
        .map(|p| p.into_owned())
        .unwrap_or_default();
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();

    match (method, segments.as_slice()) {
        (Method::POST, ["api", "models", org, name, "paths-info", _revision]) => {
            hub.metadata_requests.fetch_add(1, Ordering::SeqCst);
            paths_info(&hub, &format!("{}/{}", org, name), &body)
        }
        (Method::GET, [org, name, "raw", _revision, rest @ ..]) => {
            hub.metadata_requests.fetch_add(1, Ordering::SeqCst);
            raw(&hub, &format!("{}/{}", org, name), &rest.join("/"))
        }
        (Method::GET, [org, name, "resolve", commit, rest @ ..]) => {
            resolve(&hub, &format!("{}/{}", org, name), commit, &rest.join("/"), &headers)
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

fn lookup(hub: &HubState, repo: &str, path: &str) -> Option<MockFile> {
    if repo != REPO {
        return None;
    }
    hub.files.lock().unwrap().get(path).cloned()
}

fn paths_info(hub: &HubState, repo: &str, body: &[u8]) -> Response {
    if !hub.options.lock().unwrap().paths_info {
        return StatusCode::NOT_FOUND.into_response();
    }

    let request: serde_json::Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    let paths = request["paths"].as_array().cloned().unwrap_or_default();

    let entries: Vec<serde_json::Value> = paths
        .iter()
        .filter_map(|p| p.as_str())
        .filter_map(|p| lookup(hub, repo, p).map(|file| (p.to_string(), file)))
        .map(|(path, file)| {
            let mut entry = serde_json::json!({
                "type": "file",
                "oid": file.oid(),
                "size": file.size(),
                "path": path,
                "lastCommit": {
                    "id": file.commit,
                    "title": "Upload",
                    "date": "2025-01-01T00:00:00.000Z"
                }
            });
            if file.lfs {
                entry["lfs"] = serde_json::json!({
                    "oid": file.sha256(),
                    "size": file.size(),
                    "pointerSize": 134
                });
            }
            entry
        })
        .collect();

    axum::Json(entries).into_response()
}

fn raw(hub: &HubState, repo: &str, path: &str) -> Response {
    let Some(file) = lookup(hub, repo, path) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let body = if file.lfs {
        format!(
            "version https://git-lfs.github.com/spec/v1\noid sha256:{}\nsize {}\n",
            file.sha256(),
            file.content.len()
        )
        .into_bytes()
    } else {
        file.content.clone()
    };

    let mut response = Body::from(body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        "x-repo-commit",
        HeaderValue::from_str(&file.commit).expect("valid commit header"),
    );
    headers.insert(
        header::ETAG,
        HeaderValue::from_str(&format!("\"{}\"", file.oid())).expect("valid etag"),
    );
    response
}

fn resolve(hub: &HubState, repo: &str, commit: &str, path: &str, headers: &HeaderMap) -> Response {
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    hub.resolves
        .lock()
        .unwrap()
        .push((path.to_string(), range.clone()));

    let Some(file) = lookup(hub, repo, path) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if file.commit != commit {
        return StatusCode::NOT_FOUND.into_response();
    }

    let options = hub.options.lock().unwrap().clone();
    let len = file.content.len();
    let start = range
        .as_deref()
        .and_then(|r| r.strip_prefix("bytes="))
        .and_then(|r| r.strip_suffix('-'))
        .and_then(|r| r.parse::<usize>().ok())
        .filter(|_| options.honor_ranges);

    let (status, data, content_range) = match start {
        Some(start) if start >= len => {
            let mut response = StatusCode::RANGE_NOT_SATISFIABLE.into_response();
            response.headers_mut().insert(
                header::CONTENT_RANGE,
                HeaderValue::from_str(&format!("bytes */{}", len)).expect("valid range"),
            );
            return response;
        }
        Some(start) => (
            StatusCode::PARTIAL_CONTENT,
            file.content[start..].to_vec(),
            Some(format!("bytes {}-{}/{}", start, len - 1, len)),
        ),
        None => (StatusCode::OK, file.content.clone(), None),
    };

    let data_len = data.len();
    let chunk_size = options.chunk_size.max(1);
    let delay = options.chunk_delay;
    let stream = async_stream::stream! {
        for chunk in data.chunks(chunk_size) {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            yield Ok::<_, Infallible>(Bytes::copy_from_slice(chunk));
        }
    };

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(data_len));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some(content_range) = content_range {
        headers.insert(
            header::CONTENT_RANGE,
            HeaderValue::from_str(&content_range).expect("valid range"),
        );
    }
    response
}
