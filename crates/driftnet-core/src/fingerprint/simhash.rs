//! 64-bit SimHash for near-duplicate detection.

/// Words that carry no signal for similarity.
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "in", "of", "to", "is", "was", "for", "on", "with", "this",
    "that", "are", "were", "be", "been", "by", "from", "we", "our", "their", "which", "also",
];

/// SimHash over lowercase alphanumeric tokens, FNV-1a per token.
pub fn simhash(text: &str) -> u64 {
    let lowered = text.to_lowercase();
    let mut v = [0i64; 64];

    for token in lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty() && !STOP_WORDS.contains(t))
    {
        let hash = fnv64(token.as_bytes());
        for (i, weight) in v.iter_mut().enumerate() {
            if (hash >> i) & 1 == 1 {
                *weight += 1;
            } else {
                *weight -= 1;
            }
        }
    }

    v.iter()
        .enumerate()
        .filter(|(_, w)| **w > 0)
        .fold(0u64, |acc, (i, _)| acc | (1u64 << i))
}

/// FNV-1a 64-bit hash.
fn fnv64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 14695981039346656037;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    hash
}

pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Splits a hash into `max_distance + 1` contiguous bands.
///
/// Two hashes within `max_distance` bits share at least one band exactly,
/// so band equality is a complete candidate filter.
pub fn band_keys(hash: u64, max_distance: u32) -> Vec<(u8, u64)> {
    let bands = (max_distance + 1).min(64);
    (0..bands)
        .map(|i| {
            let start = i * 64 / bands;
            let end = (i + 1) * 64 / bands;
            let width = end - start;
            let mask = if width >= 64 { u64::MAX } else { (1u64 << width) - 1 };
            (i as u8, (hash >> start) & mask)
        })
        .collect()
}
