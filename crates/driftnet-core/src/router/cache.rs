use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;

use crate::clock::{SharedClock, elapsed_between};
use crate::fingerprint::ContentHash;

use super::Tier;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub text_hash: ContentHash,
    pub source_lang: String,
    pub target_lang: String,
    pub tier: Tier,
}

impl CacheKey {
    pub fn new(text: &str, source_lang: &str, target_lang: &str, tier: Tier) -> Self {
        Self {
            text_hash: ContentHash::of(text.as_bytes()),
            source_lang: source_lang.to_lowercase(),
            target_lang: target_lang.to_lowercase(),
            tier,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedTranslation {
    text: String,
    provider: String,
    stored_at: DateTime<Utc>,
}

/// Bounded translation cache.
///
/// moka enforces capacity and a wall-clock TTL; entries are also stamped
/// with the injected clock so expiry follows the same time source as the
/// rest of the pipeline.
#[derive(Clone)]
pub struct TranslationCache {
    inner: Cache<CacheKey, CachedTranslation>,
    ttl: Duration,
    clock: SharedClock,
}

impl TranslationCache {
    pub fn new(ttl: Duration, capacity: u64, clock: SharedClock) -> Self {
        let inner = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();
        Self { inner, ttl, clock }
    }

    /// Returns `(text, provider)` for a live entry.
    pub async fn get(&self, key: &CacheKey) -> Option<(String, String)> {
        let hit = self.inner.get(key).await?;
        if elapsed_between(hit.stored_at, self.clock.now()) >= self.ttl {
            self.inner.invalidate(key).await;
            return None;
        }
        Some((hit.text, hit.provider))
    }

    pub async fn insert(&self, key: CacheKey, text: String, provider: String) {
        let entry = CachedTranslation {
            text,
            provider,
            stored_at: self.clock.now(),
        };
        self.inner.insert(key, entry).await;
    }

    pub async fn invalidate_all(&self) {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn test_hit_within_ttl() {
        let clock = ManualClock::epoch();
        let cache = TranslationCache::new(Duration::from_secs(300), 100, clock.shared());
        let key = CacheKey::new("hello", "en", "es", Tier::Quality);

        cache.insert(key.clone(), "hola".into(), "claude".into()).await;
        clock.advance(Duration::from_secs(299));

        assert_eq!(
            cache.get(&key).await,
            Some(("hola".to_string(), "claude".to_string()))
        );
    }

    #[tokio::test]
    async fn test_expires_by_injected_clock() {
        let clock = ManualClock::epoch();
        let cache = TranslationCache::new(Duration::from_secs(300), 100, clock.shared());
        let key = CacheKey::new("hello", "en", "es", Tier::Quality);

        cache.insert(key.clone(), "hola".into(), "claude".into()).await;
        clock.advance(Duration::from_secs(300));

        assert_eq!(cache.get(&key).await, None);
    }

    #[tokio::test]
    async fn test_key_includes_tier_and_languages() {
        let clock = ManualClock::epoch();
        let cache = TranslationCache::new(Duration::from_secs(300), 100, clock.shared());
        cache
            .insert(CacheKey::new("hello", "en", "es", Tier::Quality), "hola".into(), "claude".into())
            .await;

        assert!(cache.get(&CacheKey::new("hello", "en", "es", Tier::Volume)).await.is_none());
        assert!(cache.get(&CacheKey::new("hello", "en", "fr", Tier::Quality)).await.is_none());
        assert!(cache.get(&CacheKey::new("hello", "EN", "ES", Tier::Quality)).await.is_some());
    }
}
