use std::{fmt::Display, future::Future, time::Duration};

use rand::Rng;

const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);
const DEFAULT_JITTER_MIN: f64 = 0.1;
const DEFAULT_JITTER_MAX: f64 = 0.3;

/// Exponential backoff with proportional jitter.
///
/// The delay before retry `n` (0-based) is `min(base * 2^n, max_delay)`, plus a
/// random fraction of that delay drawn from `[jitter_min, jitter_max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_min: f64,
    pub jitter_max: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_min: DEFAULT_JITTER_MIN,
            jitter_max: DEFAULT_JITTER_MAX,
        }
    }

    pub const fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub const fn with_jitter(mut self, jitter_min: f64, jitter_max: f64) -> Self {
        self.jitter_min = jitter_min;
        self.jitter_max = jitter_max;
        self
    }

    /// Total number of times the operation may run.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Backoff before jitter is applied.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Backoff plus `jitter_fraction` of itself.
    pub fn delay_for(&self, attempt: u32, jitter_fraction: f64) -> Duration {
        let backoff = self.backoff(attempt);
        backoff + backoff.mul_f64(jitter_fraction.max(0.0))
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let fraction = if self.jitter_max > self.jitter_min {
            rand::thread_rng().gen_range(self.jitter_min..=self.jitter_max)
        } else {
            self.jitter_min
        };
        self.delay_for(attempt, fraction)
    }

    /// Runs `op` until it succeeds, fails with an error `is_retryable` rejects, or
    /// the retry budget is spent. The last error is returned on exhaustion.
    pub async fn run<T, E, F, Fut, P>(&self, name: &str, is_retryable: P, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 0;

        loop {
            let err = match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(
                            "[RETRY] {} succeeded on attempt {}/{}",
                            name,
                            attempt + 1,
                            max_attempts
                        );
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !is_retryable(&err) {
                tracing::error!("[RETRY] Non-retryable error in {}: {}", name, err);
                return Err(err);
            }

            tracing::warn!(
                "[RETRY] Attempt {}/{} failed for {}: {}",
                attempt + 1,
                max_attempts,
                name,
                err
            );

            if attempt >= self.max_retries {
                tracing::error!("[RETRY] All {} attempts failed for {}", max_attempts, name);
                return Err(err);
            }

            let delay = self.jittered_delay(attempt);
            tracing::info!("[RETRY] Retrying {} in {:.2}s", name, delay.as_secs_f64());
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
