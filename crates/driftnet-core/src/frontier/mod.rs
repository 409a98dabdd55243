//! Persistent, priority-ordered, per-domain-polite work queue.

pub mod domain;
pub mod entry;
pub mod memory;
pub mod priority;

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::add_duration;
use crate::error::AppError;
use crate::job::{FrontierCounts, JobConfig, JobId};
use crate::reliability::retry::exponential_delay;

pub use domain::DomainState;
pub use entry::{CompletionOutcome, EnqueueOutcome, EntryStatus, FrontierEntry, NewFrontierEntry};
pub use memory::MemoryFrontier;
pub use priority::PriorityWeights;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontierConfig {
    /// Delay for domains without robots.txt or adaptive data.
    #[serde(with = "crate::config::serde_secs")]
    pub default_crawl_delay: Duration,
    #[serde(with = "crate::config::serde_secs")]
    pub min_crawl_delay: Duration,
    #[serde(with = "crate::config::serde_secs")]
    pub max_crawl_delay: Duration,
    /// Consecutive transient failures before a domain is blocked.
    pub domain_error_threshold: u32,
    #[serde(with = "crate::config::serde_secs")]
    pub block_backoff_base: Duration,
    pub block_backoff_factor: f64,
    #[serde(with = "crate::config::serde_secs")]
    pub max_block_window: Duration,
    /// Transient re-queues per entry before it is marked failed.
    pub max_item_retries: u32,
    /// Retry `n` of an entry waits `retry_backoff_base × retry_backoff_factor^n`.
    #[serde(with = "crate::config::serde_secs")]
    pub retry_backoff_base: Duration,
    pub retry_backoff_factor: f64,
    #[serde(with = "crate::config::serde_secs")]
    pub max_retry_backoff: Duration,
    /// Derive crawl delay from observed response times.
    pub adaptive_delay: bool,
    pub politeness_factor: f64,
}

impl Default for FrontierConfig {
    fn default() -> Self {
        Self {
            default_crawl_delay: Duration::from_secs(1),
            min_crawl_delay: Duration::from_millis(500),
            max_crawl_delay: Duration::from_secs(30),
            domain_error_threshold: 5,
            block_backoff_base: Duration::from_secs(2),
            block_backoff_factor: 2.0,
            max_block_window: Duration::from_secs(3600),
            max_item_retries: 3,
            retry_backoff_base: Duration::from_secs(2),
            retry_backoff_factor: 2.0,
            max_retry_backoff: Duration::from_secs(600),
            adaptive_delay: false,
            politeness_factor: 10.0,
        }
    }
}

impl FrontierConfig {
    pub fn clamp_delay(&self, delay: Duration) -> Duration {
        delay.clamp(self.min_crawl_delay, self.max_crawl_delay.max(self.min_crawl_delay))
    }

    /// Wait before the `retry_count`-th retry (1-indexed) of a failed entry.
    pub fn retry_delay(&self, retry_count: u32) -> Duration {
        exponential_delay(
            self.retry_backoff_base,
            self.retry_backoff_factor,
            retry_count,
            self.max_retry_backoff,
        )
    }

    /// Earliest claim time for an entry re-queued at `now` as retry `retry_count`.
    pub fn next_attempt_at(&self, now: DateTime<Utc>, retry_count: u32) -> DateTime<Utc> {
        add_duration(now, self.retry_delay(retry_count))
    }
}

/// Storage for frontier entries and domain state.
///
/// `claim_next` must be atomic: an entry is handed to at most one caller
/// while pending, and a domain is claimed at most once per crawl delay.
pub trait FrontierStore: Send + Sync + Clone {
    /// Registers (or updates the bounds of) a job.
    fn register_job(&self, job: &JobConfig) -> impl Future<Output = Result<(), AppError>> + Send;

    fn enqueue(
        &self,
        entry: NewFrontierEntry,
    ) -> impl Future<Output = Result<EnqueueOutcome, AppError>> + Send;

    /// Highest-priority pending entry whose domain is eligible and whose
    /// retry backoff has elapsed, marked processing.
    ///
    /// Returns `None` if nothing is claimable right now.
    fn claim_next(
        &self,
        job_id: JobId,
    ) -> impl Future<Output = Result<Option<FrontierEntry>, AppError>> + Send;

    fn complete(
        &self,
        entry: &FrontierEntry,
        outcome: &CompletionOutcome,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn get_entry(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<FrontierEntry>, AppError>> + Send;

    fn domain_state(
        &self,
        domain: &str,
    ) -> impl Future<Output = Result<Option<DomainState>, AppError>> + Send;

    /// Stores a freshly fetched robots.txt and its crawl delay, if any.
    fn record_robots(
        &self,
        domain: &str,
        robots_txt: &str,
        crawl_delay: Option<Duration>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn adapt_crawl_delay(
        &self,
        domain: &str,
        response_time: Duration,
        floor: Duration,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Puts a failed entry back to pending with a fresh retry budget.
    ///
    /// Returns `false` for unknown entries and entries not in `failed`.
    fn requeue(&self, id: Uuid) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Return a job's processing entries to pending (crash recovery).
    fn release_processing(
        &self,
        job_id: JobId,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    fn status_counts(
        &self,
        job_id: JobId,
    ) -> impl Future<Output = Result<FrontierCounts, AppError>> + Send;
}
