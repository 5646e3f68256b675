//! Bounded exponential backoff around upstream calls.

use std::thread;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tracing::{debug, warn};

use crate::error::SourceError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total tries, the first one included.
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_interval,
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            // attempts bound the loop, not wall time
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }

    /// Delay before the next attempt. An upstream hint wins when it is longer,
    /// but never beyond `max_interval`.
    fn delay_for(&self, err: &SourceError, schedule: &mut ExponentialBackoff) -> Duration {
        let base = schedule.next_backoff().unwrap_or(self.max_interval);
        match err {
            SourceError::RateLimited {
                retry_after: Some(hint),
            } => base.max(*hint).min(self.max_interval),
            _ => base,
        }
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or
    /// `max_attempts` is used up. The last error is returned as-is.
    pub fn run<T, F>(&self, label: &str, mut op: F) -> Result<T, SourceError>
    where
        F: FnMut() -> Result<T, SourceError>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut schedule = self.schedule();
        let mut attempt = 1;

        loop {
            match op() {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(%label, attempt, "recovered after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.delay_for(&err, &mut schedule);
                    warn!(
                        %label,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "upstream call failed, backing off"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_retryable() {
                        warn!(%label, attempts = attempt, error = %err, "giving up after retries");
                    }
                    return Err(err);
                }
            }
        }
    }
}
