pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, ConfigError, NotifyKind, StageTimeouts};
pub use error::{ErrorKind, PipelineError, RetryDecision, Stage};
pub use types::*;
