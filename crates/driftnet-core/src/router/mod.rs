//! Tiered translation routing with caching and provider fallback.

pub mod cache;
pub mod translate;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::AppError;
use crate::reliability::AttemptRecord;

pub use cache::{CacheKey, TranslationCache};
pub use translate::TranslationRouter;

/// Named quality/cost profile mapping to an ordered provider chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Quality,
    Balanced,
    Volume,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Quality => "quality",
            Tier::Balanced => "balanced",
            Tier::Volume => "volume",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "quality" => Ok(Tier::Quality),
            "balanced" => Ok(Tier::Balanced),
            "volume" => Ok(Tier::Volume),
            _ => Err(format!("Unknown tier: {}", s)),
        }
    }
}

/// One translation/LLM backend.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Stable id used in tier chains, breaker names and logs.
    fn id(&self) -> &str;

    async fn call(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String, AppError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub chains: HashMap<Tier, Vec<String>>,
    #[serde(with = "crate::config::serde_secs")]
    pub cache_ttl: Duration,
    pub cache_capacity: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        let chain = |ids: &[&str]| ids.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            chains: HashMap::from([
                (Tier::Quality, chain(&["claude", "google", "azure"])),
                (Tier::Balanced, chain(&["google", "azure", "claude"])),
                (Tier::Volume, chain(&["azure", "google", "claude"])),
            ]),
            cache_ttl: Duration::from_secs(300),
            cache_capacity: 10_000,
        }
    }
}

impl RouterConfig {
    pub fn with_chain(mut self, tier: Tier, providers: &[&str]) -> Self {
        self.chains
            .insert(tier, providers.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslatedText {
    pub text: String,
    /// Provider that produced the text.
    pub provider: String,
    pub cached: bool,
}

/// Terminal routing failure for one item.
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("no provider chain configured for tier '{0}'")]
    NoChain(Tier),

    #[error("ProviderExhausted: every provider for tier '{tier}' failed after {} attempts", .attempts.len())]
    ProviderExhausted {
        tier: Tier,
        attempts: Vec<AttemptRecord>,
    },
}

impl RouterError {
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            RouterError::NoChain(_) => &[],
            RouterError::ProviderExhausted { attempts, .. } => attempts,
        }
    }

    /// Number of attempts that actually reached a provider.
    pub fn invoked_attempts(&self) -> u32 {
        self.attempts().iter().filter(|a| a.invoked).count() as u32
    }
}
