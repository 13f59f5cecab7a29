//! # Resolver Module
//!
//! Decides whether a record duplicates earlier content from the same device.
//!
//! ## Resolution Order
//! 1. **Exact** - same content hash; the earliest upload is canonical
//! 2. **Near** - perceptual hash within the threshold, among uploads
//!    inside the time window; only when no exact match exists
//! 3. Otherwise the record is canonical
//!
//! A duplicate always binds to the canonical root of its match, never to
//! another duplicate, and only to a root uploaded before it. That keeps
//! `duplicate_of` chains one hop long and acyclic.

mod overrides;

pub use overrides::mark_not_duplicate;

use crate::core::config::EngineConfig;
use crate::core::hasher::PerceptualHash;
use crate::core::record::{DuplicateMatch, MediaRecord, RecordId};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Outcome of duplicate resolution for one record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplicateVerdict {
    /// The record duplicates `canonical`
    Duplicate {
        canonical: RecordId,
        matched: DuplicateMatch,
    },
    /// The record is canonical
    NotDuplicate,
    /// No content hash yet; retry on a later pass
    Unknown,
}

impl DuplicateVerdict {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, DuplicateVerdict::Duplicate { .. })
    }

    /// Write the verdict onto a record. `Unknown` leaves the record alone.
    pub fn apply_to(&self, record: &mut MediaRecord) {
        match *self {
            DuplicateVerdict::Duplicate { canonical, matched } => {
                record.is_duplicate = true;
                record.duplicate_of = Some(canonical);
                record.duplicate_match = Some(matched);
            }
            DuplicateVerdict::NotDuplicate => {
                record.is_duplicate = false;
                record.duplicate_of = None;
                record.duplicate_match = None;
            }
            DuplicateVerdict::Unknown => {}
        }
    }
}

/// Duplicate resolver
#[derive(Debug, Clone)]
pub struct DuplicateResolver {
    threshold: u32,
    window: Duration,
}

impl DuplicateResolver {
    pub fn new(threshold: u32, window: Duration) -> Self {
        Self { threshold, window }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.near_duplicate_threshold, config.near_window())
    }

    /// Resolve a record against every other record of its device.
    ///
    /// The pool may contain the record itself; it is ignored. The pool is
    /// never mutated.
    pub fn resolve(&self, record: &MediaRecord, pool: &[MediaRecord]) -> DuplicateVerdict {
        if record.not_duplicate_override {
            return DuplicateVerdict::NotDuplicate;
        }

        let Some(ref content_hash) = record.content_hash else {
            warn!(record = %record.id, "no content hash; duplicate status unknown");
            return DuplicateVerdict::Unknown;
        };

        let candidates: Vec<&MediaRecord> = pool
            .iter()
            .filter(|c| c.id != record.id && c.device_id == record.device_id)
            .collect();
        let by_id: HashMap<RecordId, &MediaRecord> =
            pool.iter().map(|c| (c.id, c)).collect();

        // Exact match
        let exact: Vec<&MediaRecord> = candidates
            .iter()
            .copied()
            .filter(|c| c.content_hash.as_ref() == Some(content_hash))
            .collect();

        if !exact.is_empty() {
            let earliest = exact
                .iter()
                .copied()
                .min_by(|a, b| a.upload_order(b))
                .filter(|e| e.upload_order(record) == Ordering::Less);

            return match earliest.and_then(|e| self.earlier_root(e, record, &by_id)) {
                Some(canonical) => {
                    debug!(record = %record.id, canonical = %canonical, "exact duplicate");
                    DuplicateVerdict::Duplicate {
                        canonical,
                        matched: DuplicateMatch::Exact,
                    }
                }
                None => DuplicateVerdict::NotDuplicate,
            };
        }

        // Near match
        let Some(ref perceptual) = record.perceptual_hash else {
            debug!(record = %record.id, "no perceptual hash; near-duplicate check skipped");
            return DuplicateVerdict::NotDuplicate;
        };

        let from = record.upload_timestamp - self.window;
        let to = record.upload_timestamp + self.window;

        let mut near: Vec<(u32, &MediaRecord)> = candidates
            .iter()
            .copied()
            .filter(|c| c.upload_timestamp >= from && c.upload_timestamp <= to)
            .filter_map(|c| {
                c.perceptual_hash
                    .as_ref()
                    .map(|hash| (perceptual.distance(hash), c))
            })
            .filter(|(distance, _)| *distance < self.threshold)
            .collect();
        near.sort_by(|(da, a), (db, b)| da.cmp(db).then(a.upload_order(b)));

        for (distance, candidate) in near {
            if let Some(canonical) = self.earlier_root(candidate, record, &by_id) {
                debug!(record = %record.id, canonical = %canonical, distance, "near duplicate");
                return DuplicateVerdict::Duplicate {
                    canonical,
                    matched: DuplicateMatch::Near { distance },
                };
            }
        }

        DuplicateVerdict::NotDuplicate
    }

    /// Whether two records match on content, or on perceptual hash within
    /// the upload window. Upload order is not considered.
    pub fn matches(&self, a: &MediaRecord, b: &MediaRecord) -> bool {
        if a.device_id != b.device_id {
            return false;
        }
        if a.content_hash.is_some() && a.content_hash == b.content_hash {
            return true;
        }
        match (&a.perceptual_hash, &b.perceptual_hash) {
            (Some(pa), Some(pb)) => {
                (a.upload_timestamp - b.upload_timestamp).abs() <= self.window
                    && pa.distance(pb) < self.threshold
            }
            _ => false,
        }
    }

    /// The canonical root of `start`, if it was uploaded before `record`
    fn earlier_root(
        &self,
        start: &MediaRecord,
        record: &MediaRecord,
        by_id: &HashMap<RecordId, &MediaRecord>,
    ) -> Option<RecordId> {
        let root = canonical_root(start, by_id)?;
        if root.id == record.id {
            return None;
        }
        (root.upload_order(record) == Ordering::Less).then_some(root.id)
    }
}

impl Default for DuplicateResolver {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Follow `duplicate_of` links until a record that is not a duplicate.
///
/// Returns `None` for a dangling link or a cycle.
pub fn canonical_root<'a>(
    start: &'a MediaRecord,
    by_id: &HashMap<RecordId, &'a MediaRecord>,
) -> Option<&'a MediaRecord> {
    let mut current = start;
    let mut seen = HashSet::new();

    while current.is_duplicate {
        if !seen.insert(current.id) {
            warn!(record = %start.id, "duplicate chain contains a cycle");
            return None;
        }
        let next = current.duplicate_of?;
        current = match by_id.get(&next) {
            Some(record) => record,
            None => {
                warn!(record = %current.id, missing = %next, "duplicate chain is dangling");
                return None;
            }
        };
    }

    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hasher::{ContentHasher, PerceptualDigest};
    use crate::core::record::{DeviceId, NewMediaRecord};
    use chrono::{TimeZone, Utc};

    fn record(id: i64, device: &str, minute: u32, content: &[u8]) -> MediaRecord {
        let mut r = MediaRecord::from_new(
            RecordId(id),
            NewMediaRecord::new(
                DeviceId::new(device),
                format!("/m/{}.jpg", id),
                Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap(),
            ),
        );
        r.content_hash = Some(ContentHasher::new().compute_content_hash(content));
        r
    }

    fn with_phash(mut r: MediaRecord, bits: u64) -> MediaRecord {
        r.perceptual_hash = Some(PerceptualDigest::from_u64(bits));
        r
    }

    fn duplicate_of(mut r: MediaRecord, canonical: i64) -> MediaRecord {
        r.is_duplicate = true;
        r.duplicate_of = Some(RecordId(canonical));
        r
    }

    #[test]
    fn later_exact_copy_is_duplicate_of_earlier() {
        let a = record(1, "C1", 0, b"same");
        let b = record(2, "C1", 5, b"same");
        let pool = vec![a.clone(), b.clone()];

        let verdict = DuplicateResolver::default().resolve(&b, &pool);

        assert_eq!(
            verdict,
            DuplicateVerdict::Duplicate {
                canonical: RecordId(1),
                matched: DuplicateMatch::Exact
            }
        );
    }

    #[test]
    fn earliest_exact_copy_stays_canonical() {
        let a = record(1, "C1", 0, b"same");
        let b = record(2, "C1", 5, b"same");
        let pool = vec![a.clone(), b.clone()];

        let verdict = DuplicateResolver::default().resolve(&a, &pool);

        assert_eq!(verdict, DuplicateVerdict::NotDuplicate);
    }

    #[test]
    fn exact_ties_break_on_lowest_id() {
        let a = record(4, "C1", 0, b"same");
        let b = record(3, "C1", 0, b"same");
        let c = record(5, "C1", 1, b"same");
        let pool = vec![a, b, c.clone()];

        let verdict = DuplicateResolver::default().resolve(&c, &pool);

        assert!(matches!(
            verdict,
            DuplicateVerdict::Duplicate { canonical: RecordId(3), .. }
        ));
    }

    #[test]
    fn exact_match_walks_to_root() {
        let a = with_phash(record(1, "C1", 0, b"original"), 0);
        let b = duplicate_of(record(2, "C1", 1, b"copy"), 1);
        let c = record(3, "C1", 2, b"copy");
        let pool = vec![a, b, c.clone()];

        let verdict = DuplicateResolver::default().resolve(&c, &pool);

        assert!(matches!(
            verdict,
            DuplicateVerdict::Duplicate { canonical: RecordId(1), matched: DuplicateMatch::Exact }
        ));
    }

    #[test]
    fn near_match_walks_to_root() {
        let a = with_phash(record(1, "C1", 0, b"a"), 0);
        let b = duplicate_of(with_phash(record(2, "C1", 1, b"b"), 0xF), 1);
        // C is 4 bits from B but 8 bits from A
        let c = with_phash(record(3, "C1", 2, b"c"), 0xF0F);
        let pool = vec![a, b, c.clone()];

        let verdict = DuplicateResolver::default().resolve(&c, &pool);

        assert!(matches!(
            verdict,
            DuplicateVerdict::Duplicate { canonical: RecordId(1), matched: DuplicateMatch::Near { .. } }
        ));
    }

    #[test]
    fn near_match_requires_distance_below_threshold() {
        let a = with_phash(record(1, "C1", 0, b"a"), 0);
        let b = with_phash(record(2, "C1", 1, b"b"), 0b1_1111); // 5 bits
        let pool = vec![a, b.clone()];

        assert_eq!(
            DuplicateResolver::default().resolve(&b, &pool),
            DuplicateVerdict::NotDuplicate
        );

        let lenient = DuplicateResolver::new(6, Duration::minutes(5));
        assert!(lenient.resolve(&b, &pool).is_duplicate());
    }

    #[test]
    fn near_match_respects_upload_window() {
        let a = with_phash(record(1, "C1", 0, b"a"), 0);
        let b = with_phash(record(2, "C1", 6, b"b"), 1);
        let pool = vec![a, b.clone()];

        assert_eq!(
            DuplicateResolver::default().resolve(&b, &pool),
            DuplicateVerdict::NotDuplicate
        );
    }

    #[test]
    fn near_match_picks_closest_candidate() {
        let a = with_phash(record(1, "C1", 0, b"a"), 0b111);
        let b = with_phash(record(2, "C1", 1, b"b"), 0b1);
        let c = with_phash(record(3, "C1", 2, b"c"), 0);
        let pool = vec![a, b, c.clone()];

        let verdict = DuplicateResolver::default().resolve(&c, &pool);

        assert_eq!(
            verdict,
            DuplicateVerdict::Duplicate {
                canonical: RecordId(2),
                matched: DuplicateMatch::Near { distance: 1 }
            }
        );
    }

    #[test]
    fn other_devices_are_ignored() {
        let a = record(1, "C2", 0, b"same");
        let b = record(2, "C1", 5, b"same");
        let pool = vec![a, b.clone()];

        assert_eq!(
            DuplicateResolver::default().resolve(&b, &pool),
            DuplicateVerdict::NotDuplicate
        );
    }

    #[test]
    fn missing_content_hash_is_unknown() {
        let mut a = record(1, "C1", 0, b"x");
        a.content_hash = None;

        assert_eq!(
            DuplicateResolver::default().resolve(&a, &[a.clone()]),
            DuplicateVerdict::Unknown
        );
    }

    #[test]
    fn missing_perceptual_hash_still_checks_exact() {
        let a = record(1, "C1", 0, b"same");
        let b = record(2, "C1", 1, b"same");
        let c = record(3, "C1", 2, b"other");
        let pool = vec![a, b.clone(), c.clone()];

        let resolver = DuplicateResolver::default();
        assert!(resolver.resolve(&b, &pool).is_duplicate());
        assert_eq!(resolver.resolve(&c, &pool), DuplicateVerdict::NotDuplicate);
    }

    #[test]
    fn override_is_never_re_derived() {
        let a = record(1, "C1", 0, b"same");
        let mut b = record(2, "C1", 5, b"same");
        b.not_duplicate_override = true;
        let pool = vec![a, b.clone()];

        assert_eq!(
            DuplicateResolver::default().resolve(&b, &pool),
            DuplicateVerdict::NotDuplicate
        );
    }

    #[test]
    fn matches_ignores_upload_order() {
        let a = with_phash(record(1, "C1", 0, b"a"), 0);
        let b = with_phash(record(2, "C1", 2, b"b"), 0b11);
        let far = with_phash(record(3, "C1", 9, b"c"), 0b11);
        let copy = record(4, "C1", 30, b"a");
        let resolver = DuplicateResolver::default();

        assert!(resolver.matches(&a, &b));
        assert!(resolver.matches(&b, &a));
        assert!(!resolver.matches(&a, &far));
        assert!(resolver.matches(&copy, &a));
        assert!(!resolver.matches(&a, &record(5, "C2", 0, b"a")));
    }

    #[test]
    fn root_walk_stops_on_cycle() {
        let a = duplicate_of(record(1, "C1", 0, b"a"), 2);
        let b = duplicate_of(record(2, "C1", 1, b"b"), 1);
        let by_id: HashMap<_, _> = [(a.id, &a), (b.id, &b)].into_iter().collect();

        assert!(canonical_root(&a, &by_id).is_none());
    }

    #[test]
    fn apply_to_sets_and_clears_fields() {
        let mut r = record(2, "C1", 0, b"x");
        DuplicateVerdict::Duplicate {
            canonical: RecordId(1),
            matched: DuplicateMatch::Exact,
        }
        .apply_to(&mut r);
        assert!(r.is_duplicate);
        assert_eq!(r.duplicate_of, Some(RecordId(1)));

        DuplicateVerdict::NotDuplicate.apply_to(&mut r);
        assert!(!r.is_duplicate);
        assert!(r.duplicate_of.is_none());
        assert!(r.duplicate_match.is_none());
    }
}
