use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Every problem found while loading configuration, reported together.
#[derive(Debug, Error, PartialEq)]
#[error("invalid configuration: {}", .problems.join("; "))]
pub struct ConfigError {
    pub problems: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyKind {
    Discord,
    Slack,
}

impl FromStr for NotifyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "discord" => Ok(NotifyKind::Discord),
            "slack" => Ok(NotifyKind::Slack),
            other => Err(format!("unknown webhook kind: {other}")),
        }
    }
}

impl fmt::Display for NotifyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyKind::Discord => f.write_str("discord"),
            NotifyKind::Slack => f.write_str("slack"),
        }
    }
}

/// Per-call timeouts for each external boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    pub fetch: Duration,
    pub generate: Duration,
    pub publish: Duration,
    pub notify: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            fetch: Duration::from_secs(600),
            generate: Duration::from_secs(300),
            publish: Duration::from_secs(120),
            notify: Duration::from_secs(15),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Persistence
    pub database_url: String,

    // Content source
    pub apify_api_token: String,

    // Generator
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_concurrency: usize,

    // Publish target
    pub github_token: String,
    pub github_repo: String,
    pub github_branch: String,
    pub github_base_folder: String,

    // Notifications
    pub notify_webhook_url: Option<String>,
    pub notify_webhook_kind: Option<NotifyKind>,

    // Scheduling and retry
    pub run_schedule: String,
    pub batch_size: usize,
    pub min_batch_size: usize,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub timeouts: StageTimeouts,
}

impl Config {
    /// Load configuration from `.env` and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config = Self::from_lookup(|key| env::var(key).ok())?;
        config.log_keys();
        Ok(config)
    }

    /// Build a config from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut vars = Vars {
            lookup: move |key: &str| lookup(key).filter(|v| !v.trim().is_empty()),
            problems: Vec::new(),
        };

        let mut timeouts = StageTimeouts::default();
        timeouts.fetch = vars.secs("FETCH_TIMEOUT_SECS", timeouts.fetch);
        timeouts.generate = vars.secs("GENERATE_TIMEOUT_SECS", timeouts.generate);
        timeouts.publish = vars.secs("PUBLISH_TIMEOUT_SECS", timeouts.publish);
        timeouts.notify = vars.secs("NOTIFY_TIMEOUT_SECS", timeouts.notify);

        let config = Self {
            database_url: vars.required("DATABASE_URL"),
            apify_api_token: vars.required("APIFY_API_TOKEN"),
            gemini_api_key: vars.required("GEMINI_API_KEY"),
            gemini_model: vars.or("GEMINI_MODEL", "gemini-1.5-flash"),
            gemini_concurrency: vars.parsed("GEMINI_CONCURRENCY", 2),
            github_token: vars.required("GITHUB_TOKEN"),
            github_repo: vars.required("GITHUB_REPO"),
            github_branch: vars.or("GITHUB_BRANCH", "main"),
            github_base_folder: vars
                .or("GITHUB_BASE_FOLDER", "resources")
                .trim_matches('/')
                .to_string(),
            notify_webhook_url: vars.optional("NOTIFY_WEBHOOK_URL"),
            notify_webhook_kind: vars.parsed_opt("NOTIFY_WEBHOOK_KIND"),
            run_schedule: vars.or("RUN_SCHEDULE", "0 * * * *"),
            batch_size: vars.parsed("BATCH_SIZE", 10),
            min_batch_size: vars.parsed("MIN_BATCH_SIZE", 5),
            max_retries: vars.parsed("MAX_RETRIES", 3),
            retry_base_delay: Duration::from_millis(vars.parsed("RETRY_BASE_DELAY_MS", 5000)),
            timeouts,
        };

        let mut problems = vars.problems;
        if config.max_retries == 0 {
            problems.push("MAX_RETRIES must be at least 1".to_string());
        }
        if config.batch_size == 0 {
            problems.push("BATCH_SIZE must be at least 1".to_string());
        }
        if config.gemini_concurrency == 0 {
            problems.push("GEMINI_CONCURRENCY must be at least 1".to_string());
        }
        if !config.github_repo.is_empty() && config.github_repo.split('/').count() != 2 {
            problems.push(format!(
                "GITHUB_REPO must look like owner/name, got {:?}",
                config.github_repo
            ));
        }
        if config.run_schedule.split_whitespace().count() < 5 {
            problems.push(format!(
                "RUN_SCHEDULE is not a cron expression: {:?}",
                config.run_schedule
            ));
        }

        if problems.is_empty() {
            Ok(config)
        } else {
            Err(ConfigError { problems })
        }
    }

    fn log_keys(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  DATABASE_URL: {}", log_redacted(&self.database_url));
        tracing::info!("  APIFY_API_TOKEN: {}", log_redacted(&self.apify_api_token));
        tracing::info!("  GEMINI_API_KEY: {}", log_redacted(&self.gemini_api_key));
        tracing::info!("  GEMINI_MODEL: {}", self.gemini_model);
        tracing::info!("  GITHUB_TOKEN: {}", log_redacted(&self.github_token));
        tracing::info!(
            "  GITHUB_REPO: {} (branch {}, folder {})",
            self.github_repo,
            self.github_branch,
            self.github_base_folder
        );
        tracing::info!(
            "  NOTIFY_WEBHOOK_URL: {}",
            self.notify_webhook_url
                .as_deref()
                .map(log_redacted)
                .unwrap_or_else(|| "<not set>".to_string())
        );
        tracing::info!("  RUN_SCHEDULE: {}", self.run_schedule);
        tracing::info!(
            "  BATCH_SIZE: {} (min {}), MAX_RETRIES: {}, RETRY_BASE_DELAY: {}ms",
            self.batch_size,
            self.min_batch_size,
            self.max_retries,
            self.retry_base_delay.as_millis()
        );
    }
}

/// Short preview of a secret for logs.
pub fn log_redacted(val: &str) -> String {
    let n = val.chars().take(5).map(char::len_utf8).sum::<usize>();
    format!("{}...({} chars)", &val[..n], val.len())
}

struct Vars<F> {
    lookup: F,
    problems: Vec<String>,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn required(&mut self, key: &str) -> String {
        match (self.lookup)(key) {
            Some(v) => v,
            None => {
                self.problems.push(format!("{key} environment variable is required"));
                String::new()
            }
        }
    }

    fn optional(&mut self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }

    fn or(&mut self, key: &str, default: &str) -> String {
        (self.lookup)(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T: FromStr>(&mut self, key: &str, default: T) -> T
    where
        T::Err: fmt::Display,
    {
        self.parsed_opt(key).unwrap_or(default)
    }

    fn parsed_opt<T: FromStr>(&mut self, key: &str) -> Option<T>
    where
        T::Err: fmt::Display,
    {
        let raw = (self.lookup)(key)?;
        match raw.trim().parse() {
            Ok(v) => Some(v),
            Err(e) => {
                self.problems.push(format!("{key} is invalid ({raw:?}): {e}"));
                None
            }
        }
    }

    fn secs(&mut self, key: &str, default: Duration) -> Duration {
        self.parsed_opt::<u64>(key)
            .map(Duration::from_secs)
            .unwrap_or(default)
    }
}
