//! The ordered resolution stages.
//!
//! Each stage is callable on its own. `plan_record` chains the duplicate,
//! burst and rebind stages into one change set without touching any store.

use crate::core::burst::{BurstGrouper, BurstPlan};
use crate::core::hasher::{ContentDigest, Hashers, PerceptualDigest};
use crate::core::record::{BurstGroupId, DuplicateMatch, MediaRecord, RecordId};
use crate::core::resolver::{DuplicateResolver, DuplicateVerdict};
use crate::error::HashError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Fingerprints computed for one record
#[derive(Debug, Clone, Default)]
pub struct HashStage {
    pub content: Option<ContentDigest>,
    pub perceptual: Option<PerceptualDigest>,
}

impl HashStage {
    /// Hash a payload read for `record`.
    ///
    /// A read failure yields no fingerprints at all; the record then
    /// resolves as unknown and is retried later.
    pub fn compute(
        hashers: &Hashers,
        record: &MediaRecord,
        payload: Result<Vec<u8>, HashError>,
    ) -> Self {
        let bytes = match payload {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(record = %record.id, error = %e, "media unreadable; hashes not computed");
                return Self::default();
            }
        };

        let content = Some(hashers.content.compute_content_hash(&bytes));
        let perceptual = hashers.perceptual.hash_payload(&bytes);
        if perceptual.is_none() {
            debug!(record = %record.id, "no perceptual hash; near-duplicate check will be skipped");
        }

        Self { content, perceptual }
    }

    /// Fill in whichever fingerprints the record is still missing
    pub fn apply_to(&self, record: &mut MediaRecord) {
        if record.content_hash.is_none() {
            record.content_hash = self.content.clone();
        }
        if record.perceptual_hash.is_none() {
            record.perceptual_hash = self.perceptual.clone();
        }
    }
}

/// Burst side of a record outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurstOutcome {
    pub group_id: BurstGroupId,
    pub sequence: u32,
    /// The group was created by this record
    pub minted: bool,
}

/// What resolving one record decided
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordOutcome {
    pub record: RecordId,
    pub verdict: DuplicateVerdict,
    /// The record turned from canonical into a duplicate
    pub newly_duplicate: bool,
    pub burst: Option<BurstOutcome>,
    /// Other records whose burst fields were rewritten
    pub siblings_rewritten: usize,
    /// Later canonicals that became duplicates of this record
    pub demoted: usize,
    /// Existing duplicates moved onto a new canonical root
    pub repointed: usize,
}

impl RecordOutcome {
    pub fn resolved(&self) -> bool {
        self.verdict != DuplicateVerdict::Unknown
    }

    pub fn minted_group(&self) -> bool {
        self.burst.as_ref().map(|b| b.minted).unwrap_or(false)
    }

    /// Records that became duplicates because of this resolution
    pub fn new_duplicates(&self) -> usize {
        usize::from(self.newly_duplicate) + self.demoted
    }
}

/// A record's full change set, ready to commit
#[derive(Debug, Clone)]
pub struct RecordPlan {
    /// Only records that differ from their stored form; the record
    /// itself first when it changed. Empty when nothing changed.
    pub changes: Vec<MediaRecord>,
    pub outcome: RecordOutcome,
}

impl RecordPlan {
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty()
    }
}

/// A duplicate link rewritten on another record of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rebind {
    /// An existing duplicate now points at `canonical`
    Repoint { record: RecordId, canonical: RecordId },
    /// A later canonical becomes a duplicate of `canonical`
    Demote {
        record: RecordId,
        canonical: RecordId,
        matched: DuplicateMatch,
    },
}

impl Rebind {
    pub fn record(&self) -> RecordId {
        match *self {
            Rebind::Repoint { record, .. } | Rebind::Demote { record, .. } => record,
        }
    }

    pub fn apply_to(&self, target: &mut MediaRecord) {
        match *self {
            Rebind::Repoint { canonical, .. } => target.duplicate_of = Some(canonical),
            Rebind::Demote {
                canonical, matched, ..
            } => DuplicateVerdict::Duplicate { canonical, matched }.apply_to(target),
        }
    }
}

/// Run the duplicate stage
pub fn duplicate_stage(
    resolver: &DuplicateResolver,
    record: &mut MediaRecord,
    pool: &[MediaRecord],
) -> DuplicateVerdict {
    let verdict = resolver.resolve(record, pool);
    verdict.apply_to(record);
    verdict
}

/// Run the burst stage; the returned plan may cover siblings too
pub fn burst_stage(
    grouper: &BurstGrouper,
    record: &mut MediaRecord,
    pool: &[MediaRecord],
) -> Option<BurstPlan> {
    let plan = grouper.group(record, pool)?;
    plan.apply_to(record);
    Some(plan)
}

/// Keep every `duplicate_of` link one hop long after `record` resolved.
///
/// A record that became a duplicate hands its own duplicates over to its
/// root. A canonical record takes over any later, already resolved
/// canonical that now resolves to it, together with that record's
/// duplicates. `record` must already carry its verdict.
pub fn rebind_stage(
    resolver: &DuplicateResolver,
    record: &MediaRecord,
    verdict: DuplicateVerdict,
    pool: &[MediaRecord],
) -> Vec<Rebind> {
    match verdict {
        DuplicateVerdict::Unknown => Vec::new(),
        DuplicateVerdict::Duplicate { canonical, .. } => {
            dependents(pool, record.id, canonical).collect()
        }
        DuplicateVerdict::NotDuplicate => {
            let later: Vec<&MediaRecord> = pool
                .iter()
                .filter(|c| {
                    c.id != record.id
                        && c.resolved
                        && !c.is_duplicate
                        && !c.not_duplicate_override
                        && record.upload_order(c) == Ordering::Less
                        && resolver.matches(record, c)
                })
                .collect();
            if later.is_empty() {
                return Vec::new();
            }

            let current: Vec<MediaRecord> = pool
                .iter()
                .map(|r| if r.id == record.id { record.clone() } else { r.clone() })
                .collect();

            let mut rebinds = Vec::new();
            for candidate in later {
                if let DuplicateVerdict::Duplicate { canonical, matched } =
                    resolver.resolve(candidate, &current)
                {
                    if canonical != record.id {
                        continue;
                    }
                    debug!(
                        record = %candidate.id,
                        canonical = %record.id,
                        "earlier upload takes over as canonical"
                    );
                    rebinds.push(Rebind::Demote {
                        record: candidate.id,
                        canonical,
                        matched,
                    });
                    rebinds.extend(dependents(pool, candidate.id, record.id));
                }
            }
            rebinds
        }
    }
}

/// Duplicates of `root`, moved onto `canonical`
fn dependents(
    pool: &[MediaRecord],
    root: RecordId,
    canonical: RecordId,
) -> impl Iterator<Item = Rebind> + '_ {
    pool.iter()
        .filter(move |r| r.is_duplicate && r.duplicate_of == Some(root))
        .map(move |r| Rebind::Repoint {
            record: r.id,
            canonical,
        })
}

/// Stored copy of a sibling, cloned on first edit
fn edit_sibling<'a>(
    edited: &'a mut BTreeMap<RecordId, MediaRecord>,
    by_id: &HashMap<RecordId, &MediaRecord>,
    id: RecordId,
) -> Option<&'a mut MediaRecord> {
    let stored = by_id.get(&id)?;
    Some(edited.entry(id).or_insert_with(|| (*stored).clone()))
}

/// Chain the duplicate, burst and rebind stages for `record` against its
/// device's `pool`.
pub fn plan_record(
    resolver: &DuplicateResolver,
    grouper: &BurstGrouper,
    mut record: MediaRecord,
    pool: &[MediaRecord],
) -> RecordPlan {
    let was_duplicate = record.is_duplicate;

    let verdict = duplicate_stage(resolver, &mut record, pool);
    let burst_plan = burst_stage(grouper, &mut record, pool);
    record.resolved = verdict != DuplicateVerdict::Unknown;
    let rebinds = rebind_stage(resolver, &record, verdict, pool);

    let by_id: HashMap<RecordId, &MediaRecord> = pool.iter().map(|r| (r.id, r)).collect();
    let mut edited: BTreeMap<RecordId, MediaRecord> = BTreeMap::new();

    let mut siblings_rewritten = 0;
    if let Some(ref plan) = burst_plan {
        for assignment in plan.assignments.iter().filter(|a| a.record != record.id) {
            if let Some(sibling) = edit_sibling(&mut edited, &by_id, assignment.record) {
                plan.apply_to(sibling);
                siblings_rewritten += 1;
            }
        }
    }

    let (mut demoted, mut repointed) = (0, 0);
    for rebind in rebinds.iter().filter(|r| r.record() != record.id) {
        if let Some(sibling) = edit_sibling(&mut edited, &by_id, rebind.record()) {
            rebind.apply_to(sibling);
            match rebind {
                Rebind::Demote { .. } => demoted += 1,
                Rebind::Repoint { .. } => repointed += 1,
            }
        }
    }

    let burst = match (&record.burst_group_id, record.burst_sequence) {
        (Some(group_id), Some(sequence)) => Some(BurstOutcome {
            group_id: group_id.clone(),
            sequence,
            minted: burst_plan.as_ref().map(|p| p.minted).unwrap_or(false),
        }),
        _ => None,
    };

    let outcome = RecordOutcome {
        record: record.id,
        verdict,
        newly_duplicate: verdict.is_duplicate() && !was_duplicate,
        burst,
        siblings_rewritten,
        demoted,
        repointed,
    };

    let unchanged = |candidate: &MediaRecord| by_id.get(&candidate.id) == Some(&candidate);
    let mut changes = Vec::with_capacity(edited.len() + 1);
    if !unchanged(&record) {
        changes.push(record);
    }
    changes.extend(edited.into_values().filter(|r| !unchanged(r)));

    RecordPlan { changes, outcome }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hasher::ContentHasher;
    use crate::core::record::{DeviceId, NewMediaRecord};
    use chrono::{Duration, TimeZone, Utc};

    fn record(id: i64, second: i64, content: &[u8]) -> MediaRecord {
        let base = Utc.with_ymd_and_hms(2024, 6, 1, 5, 0, 0).unwrap();
        let at = base + Duration::seconds(second);
        let mut r = MediaRecord::from_new(
            RecordId(id),
            NewMediaRecord::new(DeviceId::new("cam"), format!("{}.jpg", id), at).captured_at(at),
        );
        r.content_hash = Some(ContentHasher::new().compute_content_hash(content));
        r.perceptual_hash = Some(PerceptualDigest::from_u64(id as u64 * 0xFFFF));
        r
    }

    #[test]
    fn plan_marks_duplicate_and_groups_burst() {
        let first = record(1, 0, b"same");
        let second = record(2, 1, b"same");
        let pool = vec![first.clone(), second.clone()];

        let plan = plan_record(
            &DuplicateResolver::default(),
            &BurstGrouper::default(),
            second,
            &pool,
        );

        assert!(plan.outcome.newly_duplicate);
        assert!(plan.outcome.minted_group());
        assert_eq!(plan.outcome.siblings_rewritten, 1);
        assert_eq!(plan.changes.len(), 2);
        assert_eq!(plan.changes[0].id, RecordId(2));
        assert_eq!(plan.changes[0].burst_sequence, Some(2));
        assert_eq!(plan.changes[1].id, RecordId(1));
        assert_eq!(plan.changes[1].burst_sequence, Some(1));
        assert!(plan.changes.iter().all(|r| r.burst_group_id == plan.changes[0].burst_group_id));
    }

    #[test]
    fn unknown_verdict_leaves_record_unresolved() {
        let mut lone = record(1, 0, b"x");
        lone.content_hash = None;
        let pool = vec![lone.clone()];

        let plan = plan_record(
            &DuplicateResolver::default(),
            &BurstGrouper::default(),
            lone,
            &pool,
        );

        assert_eq!(plan.outcome.verdict, DuplicateVerdict::Unknown);
        assert!(!plan.outcome.resolved());
        assert!(plan.is_noop());
    }

    #[test]
    fn resolved_record_replans_to_nothing() {
        let first = record(1, 0, b"same");
        let second = record(2, 1, b"same");
        let resolver = DuplicateResolver::default();
        let grouper = BurstGrouper::default();

        let mut pool = vec![first.clone(), second.clone()];
        let plan = plan_record(&resolver, &grouper, second.clone(), &pool);
        for change in plan.changes {
            let slot = pool.iter_mut().find(|r| r.id == change.id).unwrap();
            *slot = change;
        }
        let again = plan_record(&resolver, &grouper, pool[1].clone(), &pool);

        assert!(again.is_noop());
        assert!(again.outcome.verdict.is_duplicate());
        assert!(!again.outcome.newly_duplicate);
    }

    fn resolved(mut r: MediaRecord) -> MediaRecord {
        r.resolved = true;
        r
    }

    fn points_at(mut r: MediaRecord, canonical: i64) -> MediaRecord {
        r.is_duplicate = true;
        r.duplicate_of = Some(RecordId(canonical));
        r.duplicate_match = Some(DuplicateMatch::Exact);
        r.resolved = true;
        r
    }

    #[test]
    fn late_canonical_takes_over_later_root_and_its_duplicates() {
        // 1 was unreadable when 2 and 3 arrived; 3 already points at 2
        let mut early = record(1, 0, b"same");
        early.upload_timestamp = early.upload_timestamp - Duration::minutes(10);
        let later_root = resolved(record(2, 300, b"same"));
        let copy = points_at(record(3, 600, b"same"), 2);
        let pool = vec![early.clone(), later_root, copy];

        let plan = plan_record(
            &DuplicateResolver::default(),
            &BurstGrouper::default(),
            early,
            &pool,
        );

        assert_eq!(plan.outcome.verdict, DuplicateVerdict::NotDuplicate);
        assert_eq!(plan.outcome.demoted, 1);
        assert_eq!(plan.outcome.repointed, 1);
        assert_eq!(plan.outcome.new_duplicates(), 1);
        let by_id: HashMap<RecordId, &MediaRecord> =
            plan.changes.iter().map(|r| (r.id, r)).collect();
        assert_eq!(by_id[&RecordId(2)].duplicate_of, Some(RecordId(1)));
        assert_eq!(by_id[&RecordId(3)].duplicate_of, Some(RecordId(1)));
        assert!(by_id[&RecordId(2)].is_duplicate);
    }

    #[test]
    fn new_duplicate_hands_its_duplicates_to_root() {
        // 2 was reset to canonical while 3 still points at it
        let mut root = resolved(record(1, 0, b"same"));
        root.upload_timestamp = root.upload_timestamp - Duration::minutes(10);
        let reset = record(2, 300, b"same");
        let copy = points_at(record(3, 600, b"same"), 2);
        let pool = vec![root, reset.clone(), copy];

        let plan = plan_record(
            &DuplicateResolver::default(),
            &BurstGrouper::default(),
            reset,
            &pool,
        );

        assert!(plan.outcome.newly_duplicate);
        assert_eq!(plan.outcome.repointed, 1);
        assert!(plan
            .changes
            .iter()
            .all(|r| r.duplicate_of == Some(RecordId(1))));
    }

    #[test]
    fn overridden_or_unresolved_canonicals_are_left_alone() {
        let mut early = record(1, 0, b"same");
        early.upload_timestamp = early.upload_timestamp - Duration::minutes(10);
        let mut kept = resolved(record(2, 300, b"same"));
        kept.not_duplicate_override = true;
        let pending = record(3, 600, b"same");
        let pool = vec![early.clone(), kept, pending];

        let plan = plan_record(
            &DuplicateResolver::default(),
            &BurstGrouper::default(),
            early,
            &pool,
        );

        assert_eq!(plan.outcome.demoted, 0);
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.changes[0].id, RecordId(1));
    }

    #[test]
    fn hash_stage_keeps_existing_fingerprints() {
        let hashers = Hashers::default();
        let mut r = record(1, 0, b"original");
        let original = r.content_hash.clone();

        let stage = HashStage::compute(&hashers, &r, Ok(b"different".to_vec()));
        stage.apply_to(&mut r);

        assert_eq!(r.content_hash, original);
    }

    #[test]
    fn unreadable_payload_yields_no_fingerprints() {
        let hashers = Hashers::default();
        let r = record(1, 0, b"x");
        let failure = HashError::Decode {
            reason: "gone".into(),
        };

        let stage = HashStage::compute(&hashers, &r, Err(failure));

        assert!(stage.content.is_none());
        assert!(stage.perceptual.is_none());
    }
}
