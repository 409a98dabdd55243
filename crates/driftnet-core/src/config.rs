//! Typed engine configuration.
//!
//! Every section deserializes with defaults, so a partial JSON document
//! only needs the values it overrides. Durations are written as seconds
//! (integer or fractional).

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::fingerprint::FingerprintConfig;
use crate::frontier::FrontierConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::reliability::{RateLimitConfig, ReliabilityConfig};
use crate::router::RouterConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub frontier: FrontierConfig,
    pub reliability: ReliabilityConfig,
    pub fingerprint: FingerprintConfig,
    pub router: RouterConfig,
    pub orchestrator: OrchestratorConfig,
}

impl EngineConfig {
    pub fn from_json(raw: &str) -> Result<Self, AppError> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| AppError::ConfigError(format!("invalid engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values no component can run with.
    pub fn validate(&self) -> Result<(), AppError> {
        let f = &self.frontier;
        if f.min_crawl_delay > f.max_crawl_delay {
            return Err(invalid("frontier.min_crawl_delay exceeds max_crawl_delay"));
        }
        if f.domain_error_threshold == 0 {
            return Err(invalid("frontier.domain_error_threshold must be at least 1"));
        }
        if !(f.block_backoff_factor.is_finite() && f.block_backoff_factor >= 1.0) {
            return Err(invalid("frontier.block_backoff_factor must be >= 1"));
        }
        if !(f.politeness_factor.is_finite() && f.politeness_factor > 0.0) {
            return Err(invalid("frontier.politeness_factor must be positive"));
        }
        if !(f.retry_backoff_factor.is_finite() && f.retry_backoff_factor >= 1.0) {
            return Err(invalid("frontier.retry_backoff_factor must be >= 1"));
        }

        let r = &self.reliability;
        if r.breaker.failure_threshold == 0 {
            return Err(invalid("reliability.breaker.failure_threshold must be at least 1"));
        }
        if r.retry.max_attempts == 0 {
            return Err(invalid("reliability.retry.max_attempts must be at least 1"));
        }
        if !(r.retry.factor.is_finite() && r.retry.factor >= 1.0) {
            return Err(invalid("reliability.retry.factor must be >= 1"));
        }
        validate_rate_limit("reliability.rate_limit", &r.rate_limit)?;
        for (provider, limit) in &r.provider_limits {
            validate_rate_limit(&format!("reliability.provider_limits.{provider}"), limit)?;
        }

        let fp = &self.fingerprint;
        if fp.bloom_capacity == 0 {
            return Err(invalid("fingerprint.bloom_capacity must be at least 1"));
        }
        if !(fp.bloom_error_rate > 0.0 && fp.bloom_error_rate < 1.0) {
            return Err(invalid("fingerprint.bloom_error_rate must be in (0, 1)"));
        }
        if fp.near_duplicate_distance > 63 {
            return Err(invalid("fingerprint.near_duplicate_distance must be below 64"));
        }

        if self.router.cache_ttl.is_zero() {
            return Err(invalid("router.cache_ttl must be positive"));
        }
        if self.router.cache_capacity == 0 {
            return Err(invalid("router.cache_capacity must be at least 1"));
        }

        let o = &self.orchestrator;
        if o.max_concurrency == 0 {
            return Err(invalid("orchestrator.max_concurrency must be at least 1"));
        }
        if o.item_timeout.is_zero() {
            return Err(invalid("orchestrator.item_timeout must be positive"));
        }
        if o.user_agent.trim().is_empty() {
            return Err(invalid("orchestrator.user_agent must not be empty"));
        }
        if !self.router.chains.contains_key(&o.tier) {
            return Err(invalid(&format!(
                "router.chains has no entry for default tier '{}'",
                o.tier
            )));
        }

        Ok(())
    }
}

fn validate_rate_limit(path: &str, limit: &RateLimitConfig) -> Result<(), AppError> {
    if limit.capacity < 1.0 {
        return Err(invalid(&format!("{path}.capacity must be at least 1")));
    }
    if !(limit.refill_rate.is_finite() && limit.refill_rate > 0.0) {
        return Err(invalid(&format!("{path}.refill_rate must be positive")));
    }
    Ok(())
}

fn invalid(message: &str) -> AppError {
    AppError::ConfigError(message.to_string())
}

/// `Duration` as seconds, accepting fractional values.
pub mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
