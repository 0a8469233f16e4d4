use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GeminiError>;

#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Gemini API error ({status}): {message}")]
    Api {
        status: u16,
        /// Google RPC status, e.g. `RESOURCE_EXHAUSTED`.
        code: Option<String>,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("No text in Gemini response (finish reason: {0})")]
    Empty(String),
}

impl GeminiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            GeminiError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        match self {
            GeminiError::Api { status, code, .. } => {
                *status == 429 || code.as_deref() == Some("RESOURCE_EXHAUSTED")
            }
            _ => false,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self.status(), Some(401 | 403))
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GeminiError::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for GeminiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return GeminiError::Parse(err.to_string());
        }
        GeminiError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for GeminiError {
    fn from(err: serde_json::Error) -> Self {
        GeminiError::Parse(err.to_string())
    }
}
