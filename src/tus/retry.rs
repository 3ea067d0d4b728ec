use std::time::Duration;

use super::TusError;

/// When and how long to wait before retrying a failed transfer attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait before retry `n` is `delays[n]`, or the last entry once exhausted.
    pub delays: Vec<Duration>,
    /// Retries allowed after the first failure.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(5),
                Duration::from_secs(10),
            ],
            max_retries: 2,
        }
    }
}

impl RetryPolicy {
    /// `attempt` is the zero-based index of the attempt that just failed.
    pub fn should_retry(&self, error: &TusError, attempt: u32) -> bool {
        if error.status() == Some(reqwest::StatusCode::FORBIDDEN) {
            return false;
        }
        attempt < self.max_retries
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.delays
            .get(attempt as usize)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}
