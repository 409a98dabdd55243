use std::sync::Arc;

use crate::error::AppError;

use super::bloom::BloomFilter;
use super::index::FingerprintIndex;
use super::simhash::band_keys;
use super::{ContentFingerprint, ContentHash, DedupOutcome, FingerprintConfig, NearDuplicatePolicy};

/// Two-stage duplicate detection over a [`FingerprintIndex`].
///
/// The content filter holds both the exact hash and every SimHash band key,
/// so a near duplicate can never be answered "not present".
#[derive(Clone)]
pub struct FingerprintStore<I> {
    index: I,
    config: Arc<FingerprintConfig>,
    content_filter: Arc<BloomFilter>,
    url_filter: Arc<BloomFilter>,
}

fn content_key(hash: &ContentHash) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(b'c');
    key.extend_from_slice(&hash.0);
    key
}

fn band_key(band: u8, value: u64) -> [u8; 10] {
    let mut key = [0u8; 10];
    key[0] = b'b';
    key[1] = band;
    key[2..].copy_from_slice(&value.to_be_bytes());
    key
}

pub fn url_hash(normalized_url: &str) -> ContentHash {
    ContentHash::of(normalized_url.as_bytes())
}

impl<I: FingerprintIndex> FingerprintStore<I> {
    pub fn new(index: I, config: FingerprintConfig) -> Self {
        let content_filter = BloomFilter::with_rate(config.bloom_capacity, config.bloom_error_rate);
        let url_filter = BloomFilter::with_rate(config.bloom_capacity, config.bloom_error_rate);
        tracing::debug!(
            bits = content_filter.num_bits(),
            hashes = content_filter.num_hashes(),
            "Fingerprint pre-filter sized"
        );
        Self {
            index,
            config: Arc::new(config),
            content_filter: Arc::new(content_filter),
            url_filter: Arc::new(url_filter),
        }
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    pub fn policy(&self) -> NearDuplicatePolicy {
        self.config.near_duplicate_policy
    }

    pub fn content_filter(&self) -> &BloomFilter {
        &self.content_filter
    }

    /// Rebuilds the pre-filters from the authoritative index.
    ///
    /// Must run before the first check when the index outlives the process.
    pub async fn warm(&self) -> Result<usize, AppError> {
        let keys = self.index.load_keys().await?;
        for (hash, simhash) in &keys.content {
            self.insert_content_keys(hash, *simhash);
        }
        for url in &keys.urls {
            self.url_filter.insert(&url.0);
        }
        let loaded = keys.content.len() + keys.urls.len();
        tracing::info!(
            fingerprints = keys.content.len(),
            urls = keys.urls.len(),
            "Fingerprint pre-filter warmed"
        );
        Ok(loaded)
    }

    fn insert_content_keys(&self, hash: &ContentHash, simhash: u64) {
        self.content_filter.insert(&content_key(hash));
        for (band, value) in band_keys(simhash, self.config.near_duplicate_distance) {
            self.content_filter.insert(&band_key(band, value));
        }
    }

    fn content_may_exist(&self, fingerprint: &ContentFingerprint) -> bool {
        self.content_filter.contains(&content_key(&fingerprint.content_hash))
            || band_keys(fingerprint.simhash, self.config.near_duplicate_distance)
                .into_iter()
                .any(|(band, value)| self.content_filter.contains(&band_key(band, value)))
    }

    /// Classifies content against everything recorded so far.
    pub async fn check(&self, fingerprint: &ContentFingerprint) -> Result<DedupOutcome, AppError> {
        if !self.content_may_exist(fingerprint) {
            return Ok(DedupOutcome::New);
        }

        if let Some(owner_id) = self.index.find_exact(&fingerprint.content_hash).await? {
            return Ok(DedupOutcome::ExactDuplicate { owner_id });
        }

        if let Some(near) = self
            .index
            .find_near(fingerprint.simhash, self.config.near_duplicate_distance)
            .await?
        {
            return Ok(DedupOutcome::NearDuplicate {
                owner_id: near.owner_id,
                distance: near.distance,
            });
        }

        tracing::trace!(hash = %fingerprint.content_hash, "Pre-filter false positive");
        Ok(DedupOutcome::New)
    }

    /// Records accepted content. Returns false if another writer already
    /// recorded the same content hash.
    pub async fn record(&self, fingerprint: &ContentFingerprint) -> Result<bool, AppError> {
        // Filter first so a committed index row is never hidden behind a
        // "not present" answer.
        self.insert_content_keys(&fingerprint.content_hash, fingerprint.simhash);
        self.index.insert(fingerprint).await
    }

    /// Owner of a previously ingested URL, if any.
    pub async fn check_url(&self, normalized_url: &str) -> Result<Option<String>, AppError> {
        let hash = url_hash(normalized_url);
        if !self.url_filter.contains(&hash.0) {
            return Ok(None);
        }
        self.index.find_url(&hash).await
    }

    pub async fn record_url(&self, normalized_url: &str, owner_id: &str) -> Result<bool, AppError> {
        let hash = url_hash(normalized_url);
        self.url_filter.insert(&hash.0);
        self.index.insert_url(&hash, owner_id).await
    }
}
