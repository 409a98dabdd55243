use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::{add_duration, elapsed_between};
use crate::reliability::retry::exponential_delay;
use crate::robots::RobotsRules;

use super::FrontierConfig;

/// Politeness and health record for one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainState {
    pub domain: String,
    pub crawl_delay: Duration,
    pub blocked_until: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
    pub robots_txt: Option<String>,
    pub robots_txt_fetched_at: Option<DateTime<Utc>>,
    pub last_crawl_at: Option<DateTime<Utc>>,
}

impl DomainState {
    pub fn new(domain: impl Into<String>, crawl_delay: Duration) -> Self {
        Self {
            domain: domain.into(),
            crawl_delay,
            blocked_until: None,
            consecutive_errors: 0,
            robots_txt: None,
            robots_txt_fetched_at: None,
            last_crawl_at: None,
        }
    }

    /// `last_crawl_at + crawl_delay`; `None` for a domain never crawled.
    pub fn next_eligible_at(&self) -> Option<DateTime<Utc>> {
        self.last_crawl_at
            .map(|last| add_duration(last, self.crawl_delay))
    }

    pub fn is_blocked(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until.is_some_and(|until| until > now)
    }

    /// Whether an entry of this domain may be claimed at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        !self.is_blocked(now) && self.next_eligible_at().is_none_or(|next| next <= now)
    }

    pub fn record_claim(&mut self, now: DateTime<Utc>) {
        self.last_crawl_at = Some(now);
    }

    /// A single success forgives every previous error.
    pub fn record_success(&mut self) {
        if self.consecutive_errors > 0 || self.blocked_until.is_some() {
            tracing::debug!(domain = %self.domain, "Domain recovered");
        }
        self.consecutive_errors = 0;
        self.blocked_until = None;
    }

    /// Counts a transient failure, blocking the domain at the threshold.
    pub fn record_failure(&mut self, now: DateTime<Utc>, config: &FrontierConfig) {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        if self.consecutive_errors >= config.domain_error_threshold {
            let window = exponential_delay(
                config.block_backoff_base,
                config.block_backoff_factor,
                self.consecutive_errors,
                config.max_block_window,
            );
            let until = add_duration(now, window);
            tracing::warn!(
                domain = %self.domain,
                errors = self.consecutive_errors,
                blocked_secs = window.as_secs(),
                "Blocking domain after consecutive errors"
            );
            self.blocked_until = Some(until);
        }
    }

    pub fn robots_rules(&self) -> RobotsRules {
        self.robots_txt
            .as_deref()
            .map(RobotsRules::from_content)
            .unwrap_or_default()
    }

    pub fn robots_is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.robots_txt_fetched_at
            .is_none_or(|fetched| elapsed_between(fetched, now) >= ttl)
    }

    pub fn set_robots(
        &mut self,
        robots_txt: &str,
        fetched_at: DateTime<Utc>,
        crawl_delay: Option<Duration>,
        config: &FrontierConfig,
    ) {
        self.robots_txt = Some(robots_txt.to_string());
        self.robots_txt_fetched_at = Some(fetched_at);
        if let Some(delay) = crawl_delay {
            self.crawl_delay = config.clamp_delay(delay);
        }
    }

    /// `politeness_factor × response_time`, clamped and never below `floor`.
    pub fn adapt_crawl_delay(&mut self, response_time: Duration, floor: Duration, config: &FrontierConfig) {
        let scaled = Duration::try_from_secs_f64(response_time.as_secs_f64() * config.politeness_factor)
            .unwrap_or(config.max_crawl_delay);
        self.crawl_delay = config.clamp_delay(scaled.max(floor));
    }
}
