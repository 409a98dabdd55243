//! Per-provider composition of the reliability primitives.
//!
//! Every attempt goes rate-limit gate → breaker gate → call → classify.
//! A retry re-enters at the rate-limit gate. Once the breaker is open the
//! loop stops instead of retrying against a fail-fast.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;
use crate::error::AppError;

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};
use super::rate_limiter::{RateLimitConfig, TokenBucket};
use super::retry::{AttemptRecord, RetryConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliabilityConfig {
    pub breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    /// Limit applied to providers without an override.
    pub rate_limit: RateLimitConfig,
    /// Per-provider limits keyed by provider id.
    pub provider_limits: HashMap<String, RateLimitConfig>,
}

impl ReliabilityConfig {
    pub fn rate_limit_for(&self, provider_id: &str) -> &RateLimitConfig {
        self.provider_limits
            .get(provider_id)
            .unwrap_or(&self.rate_limit)
    }
}

/// Why a guarded call gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardFailureKind {
    /// The breaker rejected the call; the provider was not invoked again.
    CircuitOpen,
    /// A permanent error ended the loop on its first occurrence.
    Permanent,
    /// Every allowed attempt failed transiently.
    RetriesExhausted,
}

impl std::fmt::Display for GuardFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardFailureKind::CircuitOpen => write!(f, "circuit open"),
            GuardFailureKind::Permanent => write!(f, "permanent failure"),
            GuardFailureKind::RetriesExhausted => write!(f, "retries exhausted"),
        }
    }
}

#[derive(Debug)]
pub struct GuardedCallError {
    pub provider_id: String,
    pub kind: GuardFailureKind,
    /// Last error returned by a gate or the provider, if any.
    pub last_error: Option<AppError>,
    pub attempts: Vec<AttemptRecord>,
}

impl std::fmt::Display for GuardedCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "provider '{}': {}", self.provider_id, self.kind)?;
        if let Some(e) = &self.last_error {
            write!(f, " ({e})")?;
        }
        Ok(())
    }
}

impl std::error::Error for GuardedCallError {}

/// Breaker, bucket and retry policy for one provider.
#[derive(Clone)]
pub struct ProviderGuard {
    provider_id: String,
    breaker: CircuitBreaker,
    limiter: TokenBucket,
    retry: RetryConfig,
    clock: SharedClock,
}

impl ProviderGuard {
    pub fn new(provider_id: impl Into<String>, config: &ReliabilityConfig, clock: SharedClock) -> Self {
        let provider_id = provider_id.into();
        Self {
            breaker: CircuitBreaker::new(provider_id.clone(), config.breaker.clone(), clock.clone()),
            limiter: TokenBucket::new(
                provider_id.clone(),
                config.rate_limit_for(&provider_id).clone(),
                clock.clone(),
            ),
            retry: config.retry.clone(),
            provider_id,
            clock,
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn limiter(&self) -> &TokenBucket {
        &self.limiter
    }

    /// Runs `operation` under the full reliability stack.
    pub async fn call<T, F, Fut>(&self, mut operation: F) -> Result<T, GuardedCallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempts = Vec::new();
        let mut attempt = 0;

        loop {
            let (invoked, error) = match self.limiter.acquire().await {
                Err(e) => (false, e),
                Ok(()) => {
                    let permit = match self.breaker.try_acquire() {
                        Ok(permit) => permit,
                        Err(open) => {
                            tracing::debug!(
                                provider = %self.provider_id,
                                attempt,
                                "Breaker open, skipping provider"
                            );
                            attempts.push(self.record(attempt, false, open.to_string()));
                            return Err(self.failure(GuardFailureKind::CircuitOpen, None, attempts));
                        }
                    };
                    match operation().await {
                        Ok(value) => {
                            permit.success();
                            return Ok(value);
                        }
                        Err(e) => {
                            permit.error(&e);
                            (true, e)
                        }
                    }
                }
            };

            attempts.push(self.record(attempt, invoked, error.to_string()));

            if !error.is_retryable() {
                tracing::debug!(provider = %self.provider_id, error = %error, "Permanent provider failure");
                return Err(self.failure(GuardFailureKind::Permanent, Some(error), attempts));
            }
            if attempt + 1 >= max_attempts {
                tracing::warn!(
                    provider = %self.provider_id,
                    attempts = attempt + 1,
                    error = %error,
                    "Retries exhausted"
                );
                return Err(self.failure(GuardFailureKind::RetriesExhausted, Some(error), attempts));
            }

            let delay = self.retry.delay_for_attempt(attempt);
            tracing::debug!(
                provider = %self.provider_id,
                attempt,
                delay_ms = %delay.as_millis(),
                error = %error,
                "Transient failure, backing off"
            );
            self.clock.sleep(delay).await;
            attempt += 1;
        }
    }

    fn record(&self, attempt: u32, invoked: bool, error: String) -> AttemptRecord {
        AttemptRecord {
            provider_id: self.provider_id.clone(),
            attempt,
            invoked,
            error,
            at: self.clock.now(),
        }
    }

    fn failure(
        &self,
        kind: GuardFailureKind,
        last_error: Option<AppError>,
        attempts: Vec<AttemptRecord>,
    ) -> GuardedCallError {
        GuardedCallError {
            provider_id: self.provider_id.clone(),
            kind,
            last_error,
            attempts,
        }
    }
}

/// Lazily created guard per provider id.
#[derive(Clone)]
pub struct ProviderGuards {
    config: Arc<ReliabilityConfig>,
    clock: SharedClock,
    guards: Arc<Mutex<HashMap<String, ProviderGuard>>>,
}

impl ProviderGuards {
    pub fn new(config: ReliabilityConfig, clock: SharedClock) -> Self {
        Self {
            config: Arc::new(config),
            clock,
            guards: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock_guards(&self) -> std::sync::MutexGuard<'_, HashMap<String, ProviderGuard>> {
        self.guards.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned provider guard registry");
            poisoned.into_inner()
        })
    }

    /// Returns the guard for `provider_id`, creating it on first use.
    pub fn guard(&self, provider_id: &str) -> ProviderGuard {
        self.lock_guards()
            .entry(provider_id.to_string())
            .or_insert_with(|| ProviderGuard::new(provider_id, &self.config, self.clock.clone()))
            .clone()
    }

    pub fn breaker_stats(&self) -> Vec<CircuitBreakerStats> {
        let mut stats: Vec<_> = self
            .lock_guards()
            .values()
            .map(|g| g.breaker.stats())
            .collect();
        stats.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        stats
    }

    pub fn config(&self) -> &ReliabilityConfig {
        &self.config
    }
}
