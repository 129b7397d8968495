//! 64-bit SimHash over word features.
//!
//! Text is lower-cased and split into word features (`[\w']+`, optionally
//! followed by a `://host/path` tail). Each feature is hashed with 64-bit
//! FNV-1 and votes +1/-1 on every bit position; a bit is set in the result
//! when its vote is non-negative. Near-duplicate text shares most features
//! and therefore most bits.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{IndexError, Result};

pub const FINGERPRINT_BITS: usize = 64;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

static WORD_FEATURES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\w']+(?:://[\w./]+)?").expect("word feature pattern is valid")
});

/// A hashed feature together with its voting weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Feature {
    pub hash: u64,
    pub weight: i64,
}

impl Feature {
    pub fn new(token: &[u8]) -> Self {
        Self {
            hash: fnv1_64(token),
            weight: 1,
        }
    }
}

/// 64-bit FNV-1 (multiply, then xor).
pub fn fnv1_64(data: &[u8]) -> u64 {
    data.iter()
        .fold(FNV_OFFSET_BASIS, |h, &b| h.wrapping_mul(FNV_PRIME) ^ u64::from(b))
}

pub fn word_features(data: &[u8]) -> Vec<Feature> {
    let text = String::from_utf8_lossy(data).to_lowercase();
    WORD_FEATURES
        .find_iter(&text)
        .map(|m| Feature::new(m.as_str().as_bytes()))
        .collect()
}

pub fn vectorize(features: &[Feature]) -> [i64; FINGERPRINT_BITS] {
    let mut votes = [0i64; FINGERPRINT_BITS];
    for feature in features {
        for (bit, vote) in votes.iter_mut().enumerate() {
            if (feature.hash >> bit) & 1 == 1 {
                *vote += feature.weight;
            } else {
                *vote -= feature.weight;
            }
        }
    }
    votes
}

pub fn fingerprint_from_votes(votes: &[i64; FINGERPRINT_BITS]) -> u64 {
    let mut fingerprint = 0u64;
    for (bit, &vote) in votes.iter().enumerate() {
        if vote >= 0 {
            fingerprint |= 1u64 << bit;
        }
    }
    fingerprint
}

/// Fingerprint of a chunk's raw bytes. Input without features (including
/// empty input) maps to `u64::MAX`.
pub fn simhash(data: &[u8]) -> u64 {
    fingerprint_from_votes(&vectorize(&word_features(data)))
}

/// Parses a hexadecimal fingerprint, with or without a `0x` prefix.
pub fn parse_fingerprint(s: &str) -> Result<u64> {
    let trimmed = s.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() {
        return Err(IndexError::invalid("fingerprint is required"));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| IndexError::invalid(format!("invalid fingerprint '{s}': {e}")))
}

pub fn format_fingerprint(fingerprint: u64) -> String {
    format!("{fingerprint:x}")
}
