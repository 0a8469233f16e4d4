use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GithubError>;

#[derive(Debug, Error)]
pub enum GithubError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("GitHub API error (status {status}): {message}")]
    Api {
        status: u16,
        message: String,
        rate_limit: Option<RateLimitHeaders>,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid repository reference: {0}")]
    InvalidRepo(String),
}

/// `x-ratelimit-*` and `retry-after` headers captured from an error response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub remaining: Option<u64>,
    /// Unix seconds at which the quota resets.
    pub reset: Option<u64>,
    pub retry_after: Option<Duration>,
}

impl GithubError {
    pub fn status(&self) -> Option<u16> {
        match self {
            GithubError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Primary or secondary rate limit: 429, or 403 with an exhausted quota or a retry hint.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            GithubError::Api {
                status: 429, ..
            } => true,
            GithubError::Api {
                status: 403,
                rate_limit: Some(rl),
                ..
            } => rl.remaining == Some(0) || rl.retry_after.is_some(),
            _ => false,
        }
    }

    /// How long to wait before retrying, relative to `now_unix`.
    pub fn retry_after(&self, now_unix: u64) -> Option<Duration> {
        let GithubError::Api {
            rate_limit: Some(rl),
            ..
        } = self
        else {
            return None;
        };
        rl.retry_after.or_else(|| {
            rl.reset
                .filter(|reset| *reset > now_unix)
                .map(|reset| Duration::from_secs(reset - now_unix))
        })
    }
}

impl From<reqwest::Error> for GithubError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return GithubError::Parse(err.to_string());
        }
        GithubError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for GithubError {
    fn from(err: serde_json::Error) -> Self {
        GithubError::Parse(err.to_string())
    }
}
