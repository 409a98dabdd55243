//! Circuit breakers, token buckets, bounded retry and dead-lettering.

pub mod circuit_breaker;
pub mod dead_letter;
pub mod guard;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerStats, CircuitState,
};
pub use dead_letter::{DeadLetterEntry, DeadLetterStore, MemoryDeadLetterQueue};
pub use guard::{GuardFailureKind, GuardedCallError, ProviderGuard, ProviderGuards, ReliabilityConfig};
pub use rate_limiter::{LimitMode, RateLimitConfig, TokenBucket};
pub use retry::{AttemptRecord, RetryConfig};
