//! Infrastructure-level retry policy for delivery jobs.
//!
//! This governs how often the durable broker re-runs a job whose processing
//! errored (e.g. the alert store was unavailable). It is unrelated to an
//! alert's own business-level `attempts` counter.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Attempt and backoff profile applied by the broker to one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRetryPolicy {
    /// Broker attempts granted to jobs enqueued by the retry sweep.
    #[serde(default = "default_retry_job_attempts")]
    pub retry_job_attempts: u32,
    /// Base delay for exponential backoff in milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Upper bound for a single backoff delay in milliseconds.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Whether to add jitter to delays.
    #[serde(default = "default_true")]
    pub use_jitter: bool,
}

fn default_retry_job_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    2000
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

fn default_true() -> bool {
    true
}

impl JobRetryPolicy {
    /// Broker attempts for a job. First-time deliveries get a single attempt,
    /// sweep-driven retries get the configured budget.
    pub fn max_attempts(&self, is_retry: bool) -> u32 {
        if is_retry {
            self.retry_job_attempts.max(1)
        } else {
            1
        }
    }

    /// Delay before the next run after `attempts_made` failed runs (1-based).
    pub fn delay_for_attempt(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(16) as i32;
        let base_delay = self.backoff_base_ms as f64 * 2f64.powi(exponent);
        let delay_ms = base_delay.min(self.backoff_max_ms as f64) as u64;

        if self.use_jitter {
            // Up to 20% jitter
            let jitter = (delay_ms as f64 * 0.2 * rand::random::<f64>()) as u64;
            Duration::from_millis(delay_ms + jitter)
        } else {
            Duration::from_millis(delay_ms)
        }
    }

    /// Whether a job that has failed `attempts_made` times may run again.
    pub fn should_retry(&self, attempts_made: u32, max_attempts: u32) -> bool {
        attempts_made < max_attempts
    }
}

impl Default for JobRetryPolicy {
    fn default() -> Self {
        Self {
            retry_job_attempts: default_retry_job_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            use_jitter: default_true(),
        }
    }
}
