use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;

use crate::clock::SharedClock;
use crate::reliability::{AttemptRecord, GuardFailureKind, ProviderGuards};

use super::cache::{CacheKey, TranslationCache};
use super::{ProviderClient, RouterConfig, RouterError, Tier, TranslatedText};

const PASSTHROUGH: &str = "passthrough";

/// Routes translations through a tier's provider chain.
///
/// Cache hits bypass rate limiting, breakers and providers entirely.
pub struct TranslationRouter {
    providers: HashMap<String, Arc<dyn ProviderClient>>,
    chains: HashMap<Tier, Vec<String>>,
    guards: ProviderGuards,
    cache: TranslationCache,
    clock: SharedClock,
}

impl TranslationRouter {
    pub fn new(config: RouterConfig, guards: ProviderGuards, clock: SharedClock) -> Self {
        Self {
            providers: HashMap::new(),
            cache: TranslationCache::new(config.cache_ttl, config.cache_capacity, clock.clone()),
            chains: config.chains,
            guards,
            clock,
        }
    }

    pub fn register_provider(&mut self, provider: Arc<dyn ProviderClient>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    pub fn with_provider(mut self, provider: Arc<dyn ProviderClient>) -> Self {
        self.register_provider(provider);
        self
    }

    pub fn guards(&self) -> &ProviderGuards {
        &self.guards
    }

    pub fn chain(&self, tier: Tier) -> Option<&[String]> {
        self.chains.get(&tier).map(Vec::as_slice)
    }

    pub async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        tier: Tier,
    ) -> Result<TranslatedText, RouterError> {
        if source_lang.trim().eq_ignore_ascii_case(target_lang.trim()) {
            return Ok(TranslatedText {
                text: text.to_string(),
                provider: PASSTHROUGH.to_string(),
                cached: false,
            });
        }

        let key = CacheKey::new(text, source_lang, target_lang, tier);
        if let Some((text, provider)) = self.cache.get(&key).await {
            tracing::debug!(tier = %tier, provider = %provider, "Translation cache hit");
            return Ok(TranslatedText {
                text,
                provider,
                cached: true,
            });
        }

        let chain = self
            .chains
            .get(&tier)
            .filter(|c| !c.is_empty())
            .ok_or(RouterError::NoChain(tier))?;

        let mut attempts: Vec<AttemptRecord> = Vec::new();
        for provider_id in chain {
            let Some(provider) = self.providers.get(provider_id) else {
                tracing::warn!(provider = %provider_id, tier = %tier, "Provider in chain is not registered");
                attempts.push(AttemptRecord {
                    provider_id: provider_id.clone(),
                    attempt: 0,
                    invoked: false,
                    error: "provider not registered".to_string(),
                    at: self.clock.now(),
                });
                continue;
            };

            let guard = self.guards.guard(provider_id);
            match guard
                .call(|| provider.call(text, source_lang, target_lang))
                .await
            {
                Ok(translated) => {
                    tracing::debug!(tier = %tier, provider = %provider_id, "Translation succeeded");
                    self.cache
                        .insert(key, translated.clone(), provider_id.clone())
                        .await;
                    return Ok(TranslatedText {
                        text: translated,
                        provider: provider_id.clone(),
                        cached: false,
                    });
                }
                Err(failure) => {
                    tracing::info!(
                        tier = %tier,
                        provider = %provider_id,
                        circuit_open = failure.kind == GuardFailureKind::CircuitOpen,
                        error = %failure,
                        "Provider failed, falling through chain"
                    );
                    attempts.extend(failure.attempts);
                }
            }
        }

        tracing::warn!(tier = %tier, attempts = attempts.len(), "Provider chain exhausted");
        Err(RouterError::ProviderExhausted { tier, attempts })
    }

    /// Translates independent texts concurrently, results in input order.
    pub async fn translate_batch(
        &self,
        texts: &[&str],
        source_lang: &str,
        target_lang: &str,
        tier: Tier,
    ) -> Vec<Result<TranslatedText, RouterError>> {
        join_all(
            texts
                .iter()
                .map(|text| self.translate(text, source_lang, target_lang, tier)),
        )
        .await
    }
}
