//! Content Fingerprinter
//!
//! SimHash-style 64-bit fingerprint over cleaned article text, emitted as a
//! 16-char lower-hex string, plus the Hamming distance used for near-duplicate
//! comparison.

/// Fingerprint of empty or token-free text.
pub const EMPTY_FINGERPRINT: &str = "0000000000000000";

/// Distance returned for null or malformed inputs.
pub const MAX_DISTANCE: u32 = 64;

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .filter(|t| t.len() > 2)
        .map(|t| t.to_string())
        .collect()
}

fn token_hash(token: &str) -> u64 {
    // First 64 bits of the MD5 digest.
    let digest = md5::compute(token.as_bytes());
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}

/// Compute the SimHash fingerprint of cleaned text.
///
/// Each token votes ±1 per bit position; a final bit is 1 iff its vote sum is
/// strictly positive. Empty text yields [`EMPTY_FINGERPRINT`].
pub fn simhash(text: &str) -> String {
    let tokens = tokenize(text);
    if tokens.is_empty() {
        return EMPTY_FINGERPRINT.to_string();
    }

    let mut votes = [0i64; 64];
    for token in &tokens {
        let hash = token_hash(token);
        for (i, vote) in votes.iter_mut().enumerate() {
            if (hash >> (63 - i)) & 1 == 1 {
                *vote += 1;
            } else {
                *vote -= 1;
            }
        }
    }

    let mut fingerprint: u64 = 0;
    for (i, vote) in votes.iter().enumerate() {
        if *vote > 0 {
            fingerprint |= 1 << (63 - i);
        }
    }

    format!("{:016x}", fingerprint)
}

/// Hamming distance between two 16-hex-char fingerprints, per-nibble XOR and
/// popcount. Null, mismatched-length or malformed inputs compare maximally
/// distant.
pub fn hamming_distance(a: Option<&str>, b: Option<&str>) -> u32 {
    let (Some(a), Some(b)) = (a, b) else {
        return MAX_DISTANCE;
    };
    if a.len() != b.len() || a.len() != 16 {
        return MAX_DISTANCE;
    }

    let mut distance = 0u32;
    for (ca, cb) in a.chars().zip(b.chars()) {
        let (Some(na), Some(nb)) = (ca.to_digit(16), cb.to_digit(16)) else {
            return MAX_DISTANCE;
        };
        distance += (na ^ nb).count_ones();
    }
    distance
}
