use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// External call boundary of a pipeline attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Generate,
    Publish,
    Notify,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Fetch => "fetch",
            Stage::Generate => "generate",
            Stage::Publish => "publish",
            Stage::Notify => "notify",
        };
        f.write_str(s)
    }
}

/// Whether a failed attempt may be repeated and after what minimum delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retryable {
        /// Lower bound on the wait, from a `retry-after` style hint.
        after: Option<Duration>,
    },
    NonRetryable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientNetwork,
    RateLimited,
    FatalAuth,
    GenerationFailure,
    PublishFailure,
    Timeout,
    Store,
    Config,
    RunRejected,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::TransientNetwork => "transient_network",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::FatalAuth => "fatal_auth",
            ErrorKind::GenerationFailure => "generation_failure",
            ErrorKind::PublishFailure => "publish_failure",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Store => "store",
            ErrorKind::Config => "config",
            ErrorKind::RunRejected => "run_rejected",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Authorization failed: {0}")]
    FatalAuth(String),

    #[error("Generation failed: {0}")]
    GenerationFailure(String),

    #[error("Publish failed: {0}")]
    PublishFailure(String),

    #[error("{stage} timed out after {}s", .after.as_secs())]
    Timeout { stage: Stage, after: Duration },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Run rejected: another pipeline run is in progress")]
    RunRejected,
}

impl PipelineError {
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        PipelineError::RateLimited {
            message: message.into(),
            retry_after,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::TransientNetwork(_) => ErrorKind::TransientNetwork,
            PipelineError::RateLimited { .. } => ErrorKind::RateLimited,
            PipelineError::FatalAuth(_) => ErrorKind::FatalAuth,
            PipelineError::GenerationFailure(_) => ErrorKind::GenerationFailure,
            PipelineError::PublishFailure(_) => ErrorKind::PublishFailure,
            PipelineError::Timeout { .. } => ErrorKind::Timeout,
            PipelineError::Store(_) => ErrorKind::Store,
            PipelineError::Config(_) => ErrorKind::Config,
            PipelineError::RunRejected => ErrorKind::RunRejected,
        }
    }

    pub fn retry_decision(&self) -> RetryDecision {
        match self {
            PipelineError::RateLimited { retry_after, .. } => RetryDecision::Retryable {
                after: *retry_after,
            },
            PipelineError::TransientNetwork(_)
            | PipelineError::GenerationFailure(_)
            | PipelineError::PublishFailure(_)
            | PipelineError::Timeout { .. }
            | PipelineError::Store(_) => RetryDecision::Retryable { after: None },
            PipelineError::FatalAuth(_)
            | PipelineError::Config(_)
            | PipelineError::RunRejected => RetryDecision::NonRetryable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.retry_decision(), RetryDecision::Retryable { .. })
    }
}
