pub mod error;
pub mod types;

pub use error::{GithubError, RateLimitHeaders, Result};
pub use types::{CommitRef, CommittedContent, ContentEntry, FileContent, PutFileResponse, RepoRef};

use std::time::Duration;

use base64::Engine;
use reqwest::header::{HeaderMap, ACCEPT, RETRY_AFTER, USER_AGENT};
use reqwest::{Method, StatusCode, Url};
use types::{ErrorBody, PutFileRequest, RawFile};

const BASE_URL: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";

pub struct GithubClient {
    client: reqwest::Client,
    token: String,
    repo: RepoRef,
    base_url: String,
}

impl GithubClient {
    pub fn new(token: String, repo: RepoRef) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            repo,
            base_url: BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        self
    }

    pub fn repo(&self) -> &RepoRef {
        &self.repo
    }

    /// Browser URL of a file on a branch.
    pub fn blob_url(&self, branch: &str, path: &str) -> String {
        let encoded: Vec<String> = path.split('/').map(encode_segment).collect();
        format!(
            "https://github.com/{}/{}/blob/{}/{}",
            self.repo.owner,
            self.repo.name,
            branch,
            encoded.join("/")
        )
    }

    fn contents_url(&self, path: &str) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| GithubError::Parse(format!("invalid base url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| GithubError::Parse("base url cannot be a base".into()))?
            .pop_if_empty()
            .extend(["repos", self.repo.owner.as_str(), self.repo.name.as_str(), "contents"])
            .extend(path.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, "threadpress")
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let rate_limit = rate_limit_headers(resp.headers());
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.message)
            .unwrap_or(body);
        Err(GithubError::Api {
            status: status.as_u16(),
            message,
            rate_limit: Some(rate_limit),
        })
    }

    /// List a directory. A missing directory yields an empty listing.
    pub async fn list_dir(&self, path: &str, branch: &str) -> Result<Vec<ContentEntry>> {
        let url = self.contents_url(path)?;
        let resp = self
            .request(Method::GET, url)
            .query(&[("ref", branch)])
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            tracing::debug!(path, "Directory does not exist yet");
            return Ok(Vec::new());
        }
        let entries: Vec<ContentEntry> = Self::check(resp).await?.json().await?;
        Ok(entries)
    }

    /// Read a file, returning `None` when it does not exist.
    pub async fn get_file(&self, path: &str, branch: &str) -> Result<Option<FileContent>> {
        let url = self.contents_url(path)?;
        let resp = self
            .request(Method::GET, url)
            .query(&[("ref", branch)])
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let raw: RawFile = Self::check(resp).await?.json().await?;
        Ok(Some(decode_file(raw)?))
    }

    /// Create a file, or update it when `sha` names the blob being replaced.
    pub async fn put_file(
        &self,
        path: &str,
        branch: &str,
        message: &str,
        body: &str,
        sha: Option<&str>,
    ) -> Result<PutFileResponse> {
        let url = self.contents_url(path)?;
        let payload = PutFileRequest {
            message,
            content: base64::engine::general_purpose::STANDARD.encode(body.as_bytes()),
            branch,
            sha,
        };

        tracing::debug!(repo = %self.repo, path, branch, "Writing file");
        let resp = self
            .request(Method::PUT, url)
            .json(&payload)
            .send()
            .await?;

        let committed: PutFileResponse = Self::check(resp).await?.json().await?;
        Ok(committed)
    }
}

fn decode_file(raw: RawFile) -> Result<FileContent> {
    if raw.encoding != "base64" && !raw.encoding.is_empty() {
        return Err(GithubError::Parse(format!(
            "unsupported content encoding: {}",
            raw.encoding
        )));
    }
    // GitHub wraps base64 bodies at 60 columns.
    let compact: String = raw.content.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| GithubError::Parse(format!("invalid base64 content: {e}")))?;
    let text = String::from_utf8(bytes)
        .map_err(|e| GithubError::Parse(format!("file is not utf-8: {e}")))?;
    Ok(FileContent {
        path: raw.path,
        sha: raw.sha,
        text,
    })
}

fn rate_limit_headers(headers: &HeaderMap) -> RateLimitHeaders {
    let number = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    };
    RateLimitHeaders {
        remaining: number("x-ratelimit-remaining"),
        reset: number("x-ratelimit-reset"),
        retry_after: number(RETRY_AFTER.as_str()).map(Duration::from_secs),
    }
}

fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for b in segment.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
