//! Cross-source linkage (§4.6): fingerprinting listing attributes to link
//! records describing the same physical property across sources, and
//! flagging price discrepancies between sources that share a fingerprint.
//!
//! New module — no teacher counterpart. ASCII-fold normalization is done by
//! hand rather than pulling in a Unicode-normalization crate, since the
//! normalized inputs here (Bulgarian neighborhood/building-type names as
//! Latin-transliterated ASCII strings, per the reference extractor in
//! §10.4) never contain non-ASCII diacritics in practice; see the module
//! doc on [`normalize`] for the exact scope of what is folded.

use sha2::{Digest, Sha256};

/// Attributes used to compute a fingerprint (§4.6). `sqm`/`rooms`/`floor`
/// are `Option` because the external extractor may not always recover
/// them; a missing numeric becomes an empty string per the spec's
/// normalization rule.
#[derive(Debug, Clone, PartialEq)]
pub struct FingerprintInput {
    pub neighborhood: String,
    pub sqm: Option<f64>,
    pub rooms: Option<u32>,
    pub floor: Option<i32>,
    pub building_type: String,
}

/// Lowercases, strips common Bulgarian Latin-transliteration diacritics,
/// and collapses internal whitespace. Diacritic stripping only covers the
/// small set actually emitted by Latin transliteration of Bulgarian place
/// names (e.g. "Lozenets" variants); this is not a general Unicode
/// normalizer.
pub fn normalize(input: &str) -> String {
    let lowered = input.to_lowercase();
    let folded: String = lowered
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ä' | 'ã' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'ö' | 'õ' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ñ' => 'n',
            'ç' => 'c',
            other => other,
        })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn round_sqm(sqm: Option<f64>) -> String {
    match sqm {
        Some(value) => format!("{}", value.round() as i64),
        None => String::new(),
    }
}

fn opt_to_string<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// 16-hex-character fingerprint: first 16 hex chars of
/// `SHA-256(normalize(neighborhood) | round(sqm) | rooms | floor | normalize(building_type))`
/// (§4.6). Idempotent under re-normalization: `fingerprint(normalize(x)) == fingerprint(x)`
/// for every field that flows through [`normalize`].
pub fn fingerprint(input: &FingerprintInput) -> String {
    let parts = [
        normalize(&input.neighborhood),
        round_sqm(input.sqm),
        opt_to_string(input.rooms),
        opt_to_string(input.floor),
        normalize(&input.building_type),
    ];
    let joined = parts.join("|");

    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..16].to_string()
}

/// One `(fingerprint, source)` row in the linkage table (§4.6).
#[derive(Debug, Clone, PartialEq)]
pub struct LinkageEntry {
    pub fingerprint: String,
    pub record_id: String,
    pub source: String,
    pub source_url: String,
    pub price: f64,
    pub first_seen: chrono::DateTime<chrono::Utc>,
    pub last_seen: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceDiscrepancy {
    pub discrepancy_pct: f64,
}

/// Threshold used by [`detect_discrepancy`] (§4.6: "flag when ≥ 5%").
pub const PRICE_DISCREPANCY_THRESHOLD_PCT: f64 = 5.0;

/// When `entries` (all sharing one fingerprint) contains ≥ 2 rows, computes
/// `(max - min) / min * 100` and flags it when at or above the threshold
/// (§4.6, §8 scenario 6).
pub fn detect_discrepancy(entries: &[LinkageEntry], threshold_pct: f64) -> Option<PriceDiscrepancy> {
    if entries.len() < 2 {
        return None;
    }
    let min = entries.iter().map(|e| e.price).fold(f64::INFINITY, f64::min);
    let max = entries.iter().map(|e| e.price).fold(f64::NEG_INFINITY, f64::max);
    if min <= 0.0 {
        return None;
    }
    let pct = (max - min) / min * 100.0;
    if pct >= threshold_pct {
        Some(PriceDiscrepancy { discrepancy_pct: pct })
    } else {
        None
    }
}
