use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use threadpress_common::{PipelineError, RetryDecision};

type Classifier = Arc<dyn Fn(&PipelineError) -> bool + Send + Sync>;

/// One retry policy for the whole pipeline: bounded attempts with linear backoff.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    is_retryable: Classifier,
}

impl RetryPolicy {
    /// Classifies errors by their own retry decision.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            is_retryable: Arc::new(PipelineError::is_retryable),
        }
    }

    pub fn with_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&PipelineError) -> bool + Send + Sync + 'static,
    {
        self.is_retryable = Arc::new(classifier);
        self
    }

    pub fn is_retryable(&self, err: &PipelineError) -> bool {
        (self.is_retryable)(err)
    }

    /// Whether attempt number `attempt` (1-based) may be followed by another.
    pub fn should_retry(&self, err: &PipelineError, attempt: u32) -> bool {
        attempt < self.max_attempts && self.is_retryable(err)
    }

    /// `base_delay * attempt`, raised to the error's retry-after hint when larger.
    pub fn delay_for(&self, attempt: u32, err: &PipelineError) -> Duration {
        let linear = self.base_delay.saturating_mul(attempt.max(1));
        match err.retry_decision() {
            RetryDecision::Retryable { after: Some(after) } => linear.max(after),
            _ => linear,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(5))
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .finish_non_exhaustive()
    }
}

/// Attempt counter for one invocation. Never persisted.
#[derive(Debug, Default, Clone)]
pub struct RetryState {
    pub attempt: u32,
    pub last_error: Option<PipelineError>,
}

impl RetryState {
    /// Advance to the next attempt and return its 1-based number.
    pub fn begin(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    pub fn fail(&mut self, err: PipelineError) {
        self.last_error = Some(err);
    }

    pub fn retries(&self) -> u32 {
        self.attempt.saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_linear_in_attempt_number() {
        let policy = RetryPolicy::new(3, Duration::from_millis(5000));
        let err = PipelineError::TransientNetwork("reset".into());
        assert_eq!(policy.delay_for(1, &err), Duration::from_millis(5000));
        assert_eq!(policy.delay_for(2, &err), Duration::from_millis(10000));
    }

    #[test]
    fn retry_after_hint_wins_when_longer() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let err = PipelineError::rate_limited("429", Some(Duration::from_secs(60)));
        assert_eq!(policy.delay_for(2, &err), Duration::from_secs(60));

        let short = PipelineError::rate_limited("429", Some(Duration::from_millis(10)));
        assert_eq!(policy.delay_for(2, &short), Duration::from_secs(2));
    }

    #[test]
    fn attempts_are_bounded() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let err = PipelineError::PublishFailure("409".into());
        assert!(policy.should_retry(&err, 1));
        assert!(policy.should_retry(&err, 2));
        assert!(!policy.should_retry(&err, 3));
    }

    #[test]
    fn non_retryable_errors_stop_immediately() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        assert!(!policy.should_retry(&PipelineError::FatalAuth("401".into()), 1));
    }

    #[test]
    fn custom_classifier_overrides_defaults() {
        let policy = RetryPolicy::new(3, Duration::ZERO)
            .with_classifier(|e| matches!(e, PipelineError::TransientNetwork(_)));
        assert!(!policy.should_retry(&PipelineError::GenerationFailure("empty".into()), 1));
        assert!(policy.should_retry(&PipelineError::TransientNetwork("eof".into()), 1));
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[test]
    fn retry_state_counts_retries() {
        let mut state = RetryState::default();
        assert_eq!(state.begin(), 1);
        state.fail(PipelineError::Store("gone".into()));
        assert_eq!(state.begin(), 2);
        assert_eq!(state.retries(), 1);
        assert!(state.last_error.is_some());
    }
}
