//! Exact and near-duplicate detection.
//!
//! A Bloom pre-filter answers "definitely new" cheaply; only on a hit is the
//! authoritative [`FingerprintIndex`] consulted.

pub mod bloom;
pub mod index;
pub mod simhash;
pub mod store;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AppError;

pub use bloom::BloomFilter;
pub use index::{FingerprintIndex, IndexKeys, MemoryFingerprintIndex, NearMatch};
pub use store::FingerprintStore;

/// SHA-256 digest used for exact-duplicate identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    pub fn of(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn from_hex(hex: &str) -> Result<Self, AppError> {
        if hex.len() != 64 || !hex.is_ascii() {
            return Err(AppError::Generic(format!("invalid content hash '{hex}'")));
        }
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|e| AppError::Generic(format!("invalid content hash '{hex}': {e}")))?;
        }
        Ok(Self(out))
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Immutable identity of an accepted document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentFingerprint {
    pub content_hash: ContentHash,
    pub simhash: u64,
    pub owner_id: String,
}

impl ContentFingerprint {
    /// Fingerprints `text` as it would be stored, trimmed of outer whitespace.
    pub fn compute(text: &str, owner_id: impl Into<String>) -> Self {
        let text = text.trim();
        Self {
            content_hash: ContentHash::of(text.as_bytes()),
            simhash: simhash::simhash(text),
            owner_id: owner_id.into(),
        }
    }
}

/// What to do with an item whose content is a near duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NearDuplicatePolicy {
    /// Process it and record which document it resembles.
    #[default]
    Flag,
    /// Treat it like an exact duplicate.
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    /// Expected number of distinct items.
    pub bloom_capacity: usize,
    /// Target false-positive rate at capacity.
    pub bloom_error_rate: f64,
    /// Maximum Hamming distance considered a near duplicate.
    pub near_duplicate_distance: u32,
    pub near_duplicate_policy: NearDuplicatePolicy,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            bloom_capacity: 1_000_000,
            bloom_error_rate: 0.01,
            // ~0.9 similarity on 64 bits
            near_duplicate_distance: 6,
            near_duplicate_policy: NearDuplicatePolicy::Flag,
        }
    }
}

/// Result of a duplicate check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupOutcome {
    New,
    ExactDuplicate { owner_id: String },
    NearDuplicate { owner_id: String, distance: u32 },
}

impl DedupOutcome {
    pub fn is_new(&self) -> bool {
        matches!(self, DedupOutcome::New)
    }

    /// Whether the item should be skipped under `policy`.
    pub fn should_skip(&self, policy: NearDuplicatePolicy) -> bool {
        match self {
            DedupOutcome::New => false,
            DedupOutcome::ExactDuplicate { .. } => true,
            DedupOutcome::NearDuplicate { .. } => policy == NearDuplicatePolicy::Skip,
        }
    }
}
