use std::sync::atomic::Ordering::Relaxed;
use std::sync::{atomic::AtomicBool, Arc};
use tokio::time::Duration;

use leaky_bucket::RateLimiter;

use crate::server_config::cfg;

const BACKOFF_DURATION: Duration = Duration::from_secs(60);

/// Shared throttle for generative AI prompts.
#[derive(Clone)]
pub struct RateLimiters {
    prompt: Arc<RateLimiter>,
    backoff: Arc<AtomicBool>,
    backoff_duration: Duration,
}

impl RateLimiters {
    pub fn new(prompt_limit_per_sec: usize, prompt_interval_ms: usize, prompt_refill: usize) -> Self {
        let prompt = RateLimiter::builder()
            .initial(1)
            .interval(Duration::from_millis(prompt_interval_ms as u64))
            .max(prompt_limit_per_sec)
            .refill(prompt_refill)
            .build();

        Self {
            prompt: Arc::new(prompt),
            backoff: Arc::new(AtomicBool::new(false)),
            backoff_duration: BACKOFF_DURATION,
        }
    }

    pub fn from_env() -> Self {
        let limits = &cfg.ai.prompt_limits;
        Self::new(
            limits.rate_limit_per_sec,
            limits.refill_interval_ms,
            limits.refill_amount,
        )
    }

    pub async fn acquire_one(&self) {
        if self.is_backing_off() {
            tokio::time::sleep(self.backoff_duration).await;
        }
        self.prompt.acquire_one().await;
    }

    pub fn is_backing_off(&self) -> bool {
        self.backoff.load(Relaxed)
    }

    pub fn trigger_backoff(&self) {
        tracing::info!("Triggering backoff...");
        self.backoff.store(true, Relaxed);
        let self_ = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(self_.backoff_duration).await;
            tracing::info!("Backoff expired");
            self_.backoff.store(false, Relaxed);
        });
    }

    pub fn get_status(&self) -> String {
        let prompt_bucket = format!("{}/{}", self.prompt.balance(), self.prompt.max());
        if self.is_backing_off() {
            format!("prompts: {} (BACKOFF)", prompt_bucket)
        } else {
            format!("prompts: {}", prompt_bucket)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_backoff_expires() {
        let limiters = RateLimiters::new(10, 100, 1);
        assert!(!limiters.is_backing_off());

        limiters.trigger_backoff();
        assert!(limiters.is_backing_off());
        assert!(limiters.get_status().ends_with("(BACKOFF)"));

        tokio::time::sleep(BACKOFF_DURATION + Duration::from_secs(1)).await;
        assert!(!limiters.is_backing_off());
    }

    #[tokio::test]
    async fn test_acquire_without_backoff() {
        let limiters = RateLimiters::new(10, 10, 1);
        limiters.acquire_one().await;
        assert_eq!(limiters.get_status(), format!("prompts: {}/10", limiters.prompt.balance()));
    }
}
