use std::time::Duration;

/// Retry parameters for batch delivery. The interval grows by
/// `backoff_coefficient` for every past attempt, capped at
/// `maximum_interval`; after `max_attempts` failed sends the batch is
/// dropped.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Coefficient to multiply initial_interval with for every past attempt.
    pub backoff_coefficient: u32,
    /// The backoff interval for the first retry.
    pub initial_interval: Duration,
    /// The maximum possible backoff between retries.
    pub maximum_interval: Option<Duration>,
    /// Total number of delivery attempts, the first one included.
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Determine the interval before retrying at a given attempt number
    /// (1-based).
    pub fn retry_interval(&self, attempt: u32) -> Duration {
        let candidate_interval =
            self.initial_interval * self.backoff_coefficient.pow(attempt.saturating_sub(1));

        match self.maximum_interval {
            Some(maximum_interval) => std::cmp::min(candidate_interval, maximum_interval),
            None => candidate_interval,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_coefficient: 2,
            initial_interval: Duration::from_secs(1),
            maximum_interval: Some(Duration::from_secs(30)),
            max_attempts: 3,
        }
    }
}
