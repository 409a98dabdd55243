//! Lazily refilled token bucket, one per provider.
//!
//! Tokens are recomputed from elapsed clock time on every check; there is no
//! background refill task.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::{SharedClock, elapsed_between};
use crate::error::AppError;

/// What a caller experiences when the bucket is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitMode {
    /// Sleep until a token is available.
    #[default]
    Wait,
    /// Fail immediately with `AppError::RateLimitExceeded`.
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum burst size.
    pub capacity: f64,
    /// Tokens added per second.
    pub refill_rate: f64,
    pub mode: LimitMode,
}

impl Default for RateLimitConfig {
    /// 60 requests per minute with bursts of 60.
    fn default() -> Self {
        Self {
            capacity: 60.0,
            refill_rate: 1.0,
            mode: LimitMode::Wait,
        }
    }
}

impl RateLimitConfig {
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            mode: LimitMode::Wait,
        }
    }

    pub fn with_mode(mut self, mode: LimitMode) -> Self {
        self.mode = mode;
        self
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: DateTime<Utc>,
}

/// Snapshot of a bucket for monitoring.
#[derive(Debug, Clone)]
pub struct BucketSnapshot {
    pub provider_id: String,
    pub tokens: f64,
    pub capacity: f64,
    pub refill_rate: f64,
    pub last_refill: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TokenBucket {
    provider_id: String,
    config: RateLimitConfig,
    clock: SharedClock,
    state: Arc<Mutex<BucketState>>,
}

impl TokenBucket {
    /// Creates a full bucket.
    pub fn new(provider_id: impl Into<String>, config: RateLimitConfig, clock: SharedClock) -> Self {
        let state = BucketState {
            tokens: config.capacity,
            last_refill: clock.now(),
        };
        Self {
            provider_id: provider_id.into(),
            config,
            clock,
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(provider = %self.provider_id, "Recovered from poisoned mutex");
            poisoned.into_inner()
        })
    }

    fn refill(&self, state: &mut BucketState) {
        let now = self.clock.now();
        let elapsed = elapsed_between(state.last_refill, now).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * self.config.refill_rate).min(self.config.capacity);
        }
        // Clock moving backwards must not mint tokens later.
        if now > state.last_refill {
            state.last_refill = now;
        }
    }

    /// Takes one token if available, otherwise returns how long until one is.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut state = self.lock_state();
        self.refill(&mut state);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return Ok(());
        }

        let missing = 1.0 - state.tokens;
        if self.config.refill_rate <= 0.0 {
            return Err(Duration::MAX);
        }
        Err(Duration::from_secs_f64(missing / self.config.refill_rate))
    }

    /// Takes one token, waiting or rejecting per the configured mode.
    ///
    /// The lock is released before sleeping.
    pub async fn acquire(&self) -> Result<(), AppError> {
        loop {
            match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(wait) => match self.config.mode {
                    LimitMode::Reject => {
                        tracing::debug!(provider = %self.provider_id, "Rate limit rejected call");
                        return Err(AppError::RateLimitExceeded);
                    }
                    LimitMode::Wait => {
                        if wait == Duration::MAX {
                            return Err(AppError::RateLimitExceeded);
                        }
                        tracing::debug!(
                            provider = %self.provider_id,
                            wait_ms = %wait.as_millis(),
                            "Waiting for rate limit token"
                        );
                        self.clock.sleep(wait).await;
                    }
                },
            }
        }
    }

    pub fn snapshot(&self) -> BucketSnapshot {
        let mut state = self.lock_state();
        self.refill(&mut state);
        BucketSnapshot {
            provider_id: self.provider_id.clone(),
            tokens: state.tokens,
            capacity: self.config.capacity,
            refill_rate: self.config.refill_rate,
            last_refill: state.last_refill,
        }
    }
}
