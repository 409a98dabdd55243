use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bounded exponential backoff without jitter.
///
/// Delay schedule with defaults: 2s, 4s, 8s, 16s, 32s, 60s (capped).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    #[serde(with = "crate::config::serde_secs")]
    pub base: Duration,
    pub factor: f64,
    #[serde(with = "crate::config::serde_secs")]
    pub max_delay: Duration,
    /// Total calls allowed, the first one included.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            factor: 2.0,
            max_delay: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

impl RetryConfig {
    /// Delay to wait after the failed attempt `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        exponential_delay(self.base, self.factor, attempt, self.max_delay)
    }
}

/// `base * factor^exponent`, clamped to `cap`.
pub fn exponential_delay(base: Duration, factor: f64, exponent: u32, cap: Duration) -> Duration {
    let secs = base.as_secs_f64() * factor.powi(exponent.min(i32::MAX as u32) as i32);
    if !secs.is_finite() || secs >= cap.as_secs_f64() {
        return cap;
    }
    Duration::from_secs_f64(secs.max(0.0))
}

/// One entry of a call's attempt history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub provider_id: String,
    /// 0-indexed retry attempt within this provider's loop.
    pub attempt: u32,
    /// False when a gate rejected the attempt before the provider was called.
    pub invoked: bool,
    pub error: String,
    pub at: DateTime<Utc>,
}
