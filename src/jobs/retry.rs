//! Retry ceiling and exponential backoff shared by workers and infrastructure calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;

/// How many times a job may be attempted and how long to wait between attempts.
///
/// The delay after attempt `n` is `base * 2^(n - 1)`, capped at `max`:
///
/// ```
/// # use document_classifier::jobs::retry::RetryPolicy;
/// # use std::time::Duration;
/// let policy = RetryPolicy::new(5, Duration::from_secs(2), Duration::from_secs(10));
///
/// assert_eq!(policy.backoff(1), Duration::from_secs(2));
/// assert_eq!(policy.backoff(2), Duration::from_secs(4));
/// assert_eq!(policy.backoff(3), Duration::from_secs(8));
/// assert_eq!(policy.backoff(4), Duration::from_secs(10));
/// ```
///
/// [`RetryPolicy::delay`] is the backoff with up to `jitter_percent` of it
/// added or removed at random, so callers that failed together spread out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: i32,
    base: Duration,
    max: Duration,
    jitter_percent: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: i32, base: Duration, max: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base,
            max: max.max(base),
            jitter_percent: 0,
        }
    }

    pub fn with_jitter(self, jitter_percent: u32) -> Self {
        Self {
            jitter_percent: jitter_percent.min(100),
            ..self
        }
    }

    pub fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    /// Whether a job that has used `attempt_count` attempts may run again.
    pub fn should_retry(&self, attempt_count: i32) -> bool {
        attempt_count < self.max_attempts
    }

    pub fn backoff(&self, attempt: i32) -> Duration {
        let exponent = attempt.saturating_sub(1).clamp(0, 31) as u32;
        self.base
            .checked_mul(2u32.saturating_pow(exponent))
            .unwrap_or(self.max)
            .min(self.max)
    }

    /// Backoff for `attempt` with random jitter applied.
    pub fn delay(&self, attempt: i32) -> Duration {
        let backoff = self.backoff(attempt);
        let millis = backoff.as_millis().min(u64::MAX as u128) as u64;
        let spread = millis / 100 * u64::from(self.jitter_percent);
        if spread == 0 {
            return backoff;
        }
        let offset = rand::thread_rng().gen_range(0..=2 * spread);
        Duration::from_millis((millis - spread).saturating_add(offset))
    }
}

/// Run `op` until it succeeds or `attempts` tries have been made, sleeping
/// according to `policy` in between. Returns the last error on exhaustion.
pub async fn with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    attempts: i32,
    what: &str,
    mut op: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                let delay = policy.delay(attempt);
                tracing::warn!(
                    operation = what,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Infrastructure call failed, backing off"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
