//! Circuit breaker protecting each translation provider.
//!
//! ```text
//! Closed --(threshold tripping failures)--> Open --(cooldown)--> HalfOpen
//! HalfOpen --(trial succeeds)--> Closed
//! HalfOpen --(trial fails)-----> Open
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::{SharedClock, elapsed_between};
use crate::error::AppError;

/// Breaker position for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls reach the provider.
    Closed,
    /// Calls fail fast until the cooldown elapses.
    Open,
    /// One trial call may probe recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Breaker thresholds, shared by every provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive tripping failures that open the breaker.
    pub failure_threshold: u32,

    /// Time to wait before an open circuit admits its half-open trial.
    #[serde(with = "crate::config::serde_secs")]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct CircuitBreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
    last_error_message: Option<String>,
    trial_in_flight: bool,
    trial_generation: u64,
}

impl CircuitBreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            last_error_message: None,
            trial_in_flight: false,
            trial_generation: 0,
        }
    }
}

/// Snapshot of one provider's breaker for monitoring.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub provider_id: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub time_until_half_open: Option<Duration>,
}

/// Failure of a call made through a breaker.
#[derive(Debug)]
pub enum CircuitBreakerError {
    /// Rejected without calling the provider.
    Open {
        provider_id: String,
        retry_after: Duration,
    },
    /// The provider call itself failed.
    Inner(AppError),
}

impl std::fmt::Display for CircuitBreakerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::Open {
                provider_id,
                retry_after,
            } => {
                write!(
                    f,
                    "Provider '{}' circuit open, retry in {}s",
                    provider_id,
                    retry_after.as_secs()
                )
            }
            CircuitBreakerError::Inner(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CircuitBreakerError {}

/// Admission to one call through a breaker.
///
/// Settle it with [`BreakerPermit::success`] or [`BreakerPermit::error`].
/// Dropping an unsettled half-open trial permit frees the trial slot, so a
/// call cancelled mid-flight leaves the breaker able to admit the next trial.
#[must_use = "dropping the permit abandons the call"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: Option<u64>,
}

impl BreakerPermit<'_> {
    /// Whether this permit holds the half-open trial slot.
    pub fn is_trial(&self) -> bool {
        self.trial.is_some()
    }

    pub fn success(mut self) {
        self.trial = None;
        self.breaker.record_success();
    }

    pub fn error(mut self, error: &AppError) {
        self.trial = None;
        self.breaker.record_error(error);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if let Some(generation) = self.trial.take() {
            self.breaker.abandon_trial(generation);
        }
    }
}

/// Thread-safe circuit breaker for one provider.
#[derive(Clone)]
pub struct CircuitBreaker {
    provider_id: String,
    config: CircuitBreakerConfig,
    clock: SharedClock,
    inner: Arc<Mutex<CircuitBreakerInner>>,
}

impl CircuitBreaker {
    pub fn new(
        provider_id: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            config,
            clock,
            inner: Arc::new(Mutex::new(CircuitBreakerInner::new())),
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    /// Locks the state, recovering from poison.
    fn lock_inner(&self) -> std::sync::MutexGuard<'_, CircuitBreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(circuit = %self.provider_id, "Recovered from poisoned mutex");
            poisoned.into_inner()
        })
    }

    /// Current state. An Open breaker whose cooldown has passed reads as HalfOpen.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);
        inner.state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);

        let time_until_half_open = if inner.state == CircuitState::Open {
            Some(self.remaining_cooldown(&inner))
        } else {
            None
        };

        CircuitBreakerStats {
            provider_id: self.provider_id.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            opened_at: inner.opened_at,
            last_error: inner.last_error_message.clone(),
            time_until_half_open,
        }
    }

    /// Admission gate: a permit when a call may proceed.
    ///
    /// In HalfOpen only the first caller is admitted; everyone else fails
    /// fast until that trial's permit is settled or dropped.
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>, CircuitBreakerError> {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);

        match inner.state {
            CircuitState::Closed => Ok(BreakerPermit {
                breaker: self,
                trial: None,
            }),
            CircuitState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                inner.trial_generation += 1;
                tracing::debug!(circuit = %self.provider_id, "Admitting half-open trial call");
                Ok(BreakerPermit {
                    breaker: self,
                    trial: Some(inner.trial_generation),
                })
            }
            CircuitState::HalfOpen | CircuitState::Open => Err(CircuitBreakerError::Open {
                provider_id: self.provider_id.clone(),
                retry_after: self.remaining_cooldown(&inner),
            }),
        }
    }

    /// Runs `operation` if the breaker admits it and records the result.
    pub async fn call<F, T, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let permit = self.try_acquire()?;

        let result = operation().await;
        match &result {
            Ok(_) => permit.success(),
            Err(e) => permit.error(e),
        }

        result.map_err(CircuitBreakerError::Inner)
    }

    /// Records a failed call, counting it only if the error trips circuits.
    pub fn record_error(&self, error: &AppError) {
        if error.should_trip_circuit() {
            self.record_failure(error);
        } else {
            self.release_trial();
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock_inner();

        match inner.state {
            CircuitState::HalfOpen => {
                tracing::info!(
                    circuit = %self.provider_id,
                    "Circuit breaker closing after successful trial"
                );
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.last_error_message = None;
                inner.trial_in_flight = false;
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, error: &AppError) {
        let mut inner = self.lock_inner();
        let now = self.clock.now();

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                inner.last_error_message = Some(error.to_string());

                if inner.consecutive_failures >= self.config.failure_threshold {
                    tracing::warn!(
                        circuit = %self.provider_id,
                        failures = inner.consecutive_failures,
                        error = %error,
                        "Circuit breaker opening after {} consecutive failures",
                        inner.consecutive_failures
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(
                    circuit = %self.provider_id,
                    error = %error,
                    "Circuit breaker trial failed, returning to open state"
                );
                inner.state = CircuitState::Open;
                inner.consecutive_failures += 1;
                inner.opened_at = Some(now);
                inner.last_error_message = Some(error.to_string());
                inner.trial_in_flight = false;
            }
            CircuitState::Open => {
                inner.last_error_message = Some(error.to_string());
            }
        }
    }

    /// Frees the half-open trial slot without changing state, used when the
    /// trial ended in an error that says nothing about provider health.
    pub fn release_trial(&self) {
        let mut inner = self.lock_inner();
        inner.trial_in_flight = false;
    }

    /// Frees the trial slot held by an unsettled permit, unless a newer
    /// trial has taken it since.
    fn abandon_trial(&self, generation: u64) {
        let mut inner = self.lock_inner();
        if inner.state == CircuitState::HalfOpen
            && inner.trial_in_flight
            && inner.trial_generation == generation
        {
            tracing::debug!(circuit = %self.provider_id, "Half-open trial abandoned");
            inner.trial_in_flight = false;
        }
    }

    pub fn reset(&self) {
        let mut inner = self.lock_inner();
        tracing::info!(circuit = %self.provider_id, "Circuit breaker manually reset");
        let generation = inner.trial_generation;
        *inner = CircuitBreakerInner::new();
        inner.trial_generation = generation;
    }

    fn remaining_cooldown(&self, inner: &CircuitBreakerInner) -> Duration {
        inner
            .opened_at
            .map(|opened| {
                self.config
                    .cooldown
                    .saturating_sub(elapsed_between(opened, self.clock.now()))
            })
            .unwrap_or(self.config.cooldown)
    }

    fn maybe_transition_to_half_open(&self, inner: &mut CircuitBreakerInner) {
        if inner.state == CircuitState::Open
            && let Some(opened) = inner.opened_at
            && elapsed_between(opened, self.clock.now()) >= self.config.cooldown
        {
            tracing::info!(
                circuit = %self.provider_id,
                "Circuit breaker transitioning to half-open state"
            );
            inner.state = CircuitState::HalfOpen;
            inner.trial_in_flight = false;
        }
    }
}
