use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use leaky_bucket::RateLimiter;

use crate::email::client::gmail_rate_limiter;

/// One Gmail quota bucket per signed-in address, shared by every request the
/// user makes.
#[derive(Debug, Clone, Default)]
pub struct GmailQuotaMap {
    limiters: Arc<RwLock<HashMap<String, Arc<RateLimiter>>>>,
}

impl GmailQuotaMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limiter_for(&self, email: &str) -> Arc<RateLimiter> {
        if let Some(limiter) = self
            .limiters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(email)
        {
            return limiter.clone();
        }

        self.limiters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(email.to_string())
            .or_insert_with(|| Arc::new(gmail_rate_limiter()))
            .clone()
    }

    /// Drops buckets no client is holding.
    pub fn sweep_idle(&self) {
        let mut limiters = self.limiters.write().unwrap_or_else(PoisonError::into_inner);
        let before = limiters.len();
        limiters.retain(|_, limiter| Arc::strong_count(limiter) > 1);
        let removed = before - limiters.len();
        if removed > 0 {
            tracing::debug!("Dropped {} idle Gmail quota buckets", removed);
        }
    }

    pub fn len(&self) -> usize {
        self.limiters.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
