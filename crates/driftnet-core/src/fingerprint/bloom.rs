//! Lock-free Bloom filter used as the duplicate pre-filter.
//!
//! Bits live in `AtomicU64` words: inserts are `fetch_or` so none are lost
//! under concurrency and lookups never block.

use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};

pub struct BloomFilter {
    words: Box<[AtomicU64]>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    /// Sized for `capacity` items at `error_rate` false positives.
    ///
    /// m = -n·ln(p) / ln(2)², k = (m/n)·ln(2)
    pub fn with_rate(capacity: usize, error_rate: f64) -> Self {
        let n = capacity.max(1) as f64;
        let p = error_rate.clamp(1e-9, 0.5);
        let ln2 = std::f64::consts::LN_2;
        let num_bits = ((-n * p.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let num_hashes = ((num_bits as f64 / n) * ln2).round().max(1.0) as u32;
        Self::with_dimensions(num_bits, num_hashes)
    }

    pub fn with_dimensions(num_bits: u64, num_hashes: u32) -> Self {
        let num_words = num_bits.div_ceil(64).max(1) as usize;
        let words = (0..num_words).map(|_| AtomicU64::new(0)).collect();
        Self {
            words,
            num_bits: num_words as u64 * 64,
            num_hashes: num_hashes.max(1),
        }
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Double hashing over a SHA-256 digest of the key.
    fn positions(&self, key: &[u8]) -> impl Iterator<Item = u64> + use<> {
        let digest = Sha256::digest(key);
        let mut h1 = [0u8; 8];
        let mut h2 = [0u8; 8];
        h1.copy_from_slice(&digest[0..8]);
        h2.copy_from_slice(&digest[8..16]);
        let h1 = u64::from_le_bytes(h1);
        let h2 = u64::from_le_bytes(h2) | 1;
        let m = self.num_bits;
        (0..self.num_hashes as u64).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % m)
    }

    /// Returns true if at least one bit was newly set.
    pub fn insert(&self, key: &[u8]) -> bool {
        let mut changed = false;
        for pos in self.positions(key) {
            let mask = 1u64 << (pos % 64);
            let prev = self.words[(pos / 64) as usize].fetch_or(mask, Ordering::AcqRel);
            changed |= prev & mask == 0;
        }
        changed
    }

    /// `false` is authoritative; `true` may be a false positive.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.positions(key).all(|pos| {
            let mask = 1u64 << (pos % 64);
            self.words[(pos / 64) as usize].load(Ordering::Acquire) & mask != 0
        })
    }

    fn set_bits(&self) -> u64 {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones() as u64)
            .sum()
    }

    pub fn fill_ratio(&self) -> f64 {
        self.set_bits() as f64 / self.num_bits as f64
    }

    /// Swamidass–Baldi estimate: n ≈ -(m/k)·ln(1 - X/m).
    pub fn estimated_count(&self) -> f64 {
        let m = self.num_bits as f64;
        let x = self.set_bits() as f64;
        if x >= m {
            return f64::INFINITY;
        }
        -(m / self.num_hashes as f64) * (1.0 - x / m).ln()
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("num_bits", &self.num_bits)
            .field("num_hashes", &self.num_hashes)
            .field("fill_ratio", &self.fill_ratio())
            .finish()
    }
}
