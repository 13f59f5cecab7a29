//! Human-readable reasons for duplicate flags.

use crate::core::record::{DuplicateMatch, RecordId};

/// Perceptual digest width used when phrasing near matches
const DIGEST_BITS: u32 = 64;

/// One-line explanation of why a record duplicates `canonical`
pub fn explain(matched: Option<DuplicateMatch>, canonical: RecordId) -> String {
    match matched {
        Some(DuplicateMatch::Exact) => {
            format!("Byte-identical to record {}", canonical)
        }
        Some(DuplicateMatch::Near { distance: 0 }) => {
            format!(
                "Visually identical to record {} (same fingerprint, different bytes)",
                canonical
            )
        }
        Some(DuplicateMatch::Near { distance }) => {
            format!(
                "Visually near-identical to record {} ({} of {} fingerprint bits differ)",
                canonical, distance, DIGEST_BITS
            )
        }
        None => format!("Duplicate of record {}", canonical),
    }
}
