//! HTTP access to the hub
//!
//! Wraps a configured `reqwest::Client` together with the endpoint, auth token
//! and revision, and knows how to build the three hub URLs the pipeline uses.

use crate::config::FetchConfig;
use crate::error::{FetchError, FetchResult};
use reqwest::RequestBuilder;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};

#[derive(Debug, Clone)]
pub struct HubClient {
    http: reqwest::Client,
    endpoint: String,
    revision: String,
}

impl HubClient {
    /// Build a client with the configured timeouts, user agent and token
    ///
    /// A token that cannot be sent as a header value is an error rather than
    /// a silent fallback to anonymous requests.
    pub fn new(config: &FetchConfig) -> FetchResult<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| FetchError::InvalidToken)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            revision: config.revision.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    /// `POST {endpoint}/api/models/{repo}/paths-info/{revision}`
    pub fn paths_info_url(&self, repo_id: &str) -> String {
        format!(
            "{}/api/models/{}/paths-info/{}",
            self.endpoint,
            repo_id,
            urlencoding::encode(&self.revision)
        )
    }

    /// `GET {endpoint}/{repo}/raw/{revision}/{file}`
    pub fn raw_url(&self, repo_id: &str, file: &str) -> String {
        format!(
            "{}/{}/raw/{}/{}",
            self.endpoint,
            repo_id,
            urlencoding::encode(&self.revision),
            encode_path(file)
        )
    }

    /// `GET {endpoint}/{repo}/resolve/{commit}/{file}`
    pub fn resolve_url(&self, repo_id: &str, commit: &str, file: &str) -> String {
        format!(
            "{}/{}/resolve/{}/{}",
            self.endpoint,
            repo_id,
            urlencoding::encode(commit),
            encode_path(file)
        )
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.http.get(url)
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.http.post(url)
    }
}

/// Percent-encode each segment of a repository path, keeping the separators
fn encode_path(file: &str) -> String {
    file.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
