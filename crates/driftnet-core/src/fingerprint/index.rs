use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use crate::error::AppError;

use super::simhash::{band_keys, hamming_distance};
use super::{ContentFingerprint, ContentHash};

/// Closest stored fingerprint within the requested distance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NearMatch {
    pub owner_id: String,
    pub simhash: u64,
    pub distance: u32,
}

/// Everything needed to rebuild the pre-filter after a restart.
#[derive(Debug, Clone, Default)]
pub struct IndexKeys {
    pub content: Vec<(ContentHash, u64)>,
    pub urls: Vec<ContentHash>,
}

/// Authoritative fingerprint storage.
///
/// `insert` must be atomic on the content hash: of two concurrent inserts of
/// the same hash exactly one returns `true`.
pub trait FingerprintIndex: Send + Sync + Clone {
    fn find_exact(
        &self,
        hash: &ContentHash,
    ) -> impl Future<Output = Result<Option<String>, AppError>> + Send;

    fn find_near(
        &self,
        simhash: u64,
        max_distance: u32,
    ) -> impl Future<Output = Result<Option<NearMatch>, AppError>> + Send;

    fn insert(
        &self,
        fingerprint: &ContentFingerprint,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn find_url(
        &self,
        url_hash: &ContentHash,
    ) -> impl Future<Output = Result<Option<String>, AppError>> + Send;

    fn insert_url(
        &self,
        url_hash: &ContentHash,
        owner_id: &str,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn load_keys(&self) -> impl Future<Output = Result<IndexKeys, AppError>> + Send;
}

#[derive(Default)]
struct IndexInner {
    by_hash: HashMap<ContentHash, (u64, String)>,
    bands: HashMap<(u8, u64), Vec<ContentHash>>,
    urls: HashMap<ContentHash, String>,
}

/// In-process index. Readers share an `RwLock`; SimHash lookups go through
/// band buckets sized for `band_distance`.
#[derive(Clone)]
pub struct MemoryFingerprintIndex {
    band_distance: u32,
    inner: Arc<RwLock<IndexInner>>,
}

impl MemoryFingerprintIndex {
    pub fn new(band_distance: u32) -> Self {
        Self {
            band_distance,
            inner: Arc::new(RwLock::new(IndexInner::default())),
        }
    }

    pub fn len(&self) -> usize {
        self.read().by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, IndexInner> {
        self.inner.read().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned fingerprint index lock");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, IndexInner> {
        self.inner.write().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned fingerprint index lock");
            poisoned.into_inner()
        })
    }
}

impl FingerprintIndex for MemoryFingerprintIndex {
    async fn find_exact(&self, hash: &ContentHash) -> Result<Option<String>, AppError> {
        Ok(self.read().by_hash.get(hash).map(|(_, owner)| owner.clone()))
    }

    async fn find_near(&self, simhash: u64, max_distance: u32) -> Result<Option<NearMatch>, AppError> {
        let inner = self.read();
        let consider = |hash: &ContentHash| {
            inner.by_hash.get(hash).and_then(|(candidate, owner)| {
                let distance = hamming_distance(simhash, *candidate);
                (distance <= max_distance).then(|| NearMatch {
                    owner_id: owner.clone(),
                    simhash: *candidate,
                    distance,
                })
            })
        };

        let best = if max_distance <= self.band_distance {
            band_keys(simhash, self.band_distance)
                .iter()
                .filter_map(|key| inner.bands.get(key))
                .flatten()
                .filter_map(consider)
                .min_by_key(|m| m.distance)
        } else {
            inner.by_hash.keys().filter_map(consider).min_by_key(|m| m.distance)
        };
        Ok(best)
    }

    async fn insert(&self, fingerprint: &ContentFingerprint) -> Result<bool, AppError> {
        let mut inner = self.write();
        if inner.by_hash.contains_key(&fingerprint.content_hash) {
            return Ok(false);
        }
        inner.by_hash.insert(
            fingerprint.content_hash,
            (fingerprint.simhash, fingerprint.owner_id.clone()),
        );
        for key in band_keys(fingerprint.simhash, self.band_distance) {
            inner
                .bands
                .entry(key)
                .or_default()
                .push(fingerprint.content_hash);
        }
        Ok(true)
    }

    async fn find_url(&self, url_hash: &ContentHash) -> Result<Option<String>, AppError> {
        Ok(self.read().urls.get(url_hash).cloned())
    }

    async fn insert_url(&self, url_hash: &ContentHash, owner_id: &str) -> Result<bool, AppError> {
        let mut inner = self.write();
        if inner.urls.contains_key(url_hash) {
            return Ok(false);
        }
        inner.urls.insert(*url_hash, owner_id.to_string());
        Ok(true)
    }

    async fn load_keys(&self) -> Result<IndexKeys, AppError> {
        let inner = self.read();
        Ok(IndexKeys {
            content: inner
                .by_hash
                .iter()
                .map(|(hash, (simhash, _))| (*hash, *simhash))
                .collect(),
            urls: inner.urls.keys().copied().collect(),
        })
    }
}
