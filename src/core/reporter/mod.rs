//! # Reporter Module
//!
//! Read-only views over resolved records.
//!
//! - **Duplicate pairs** - every flagged record next to its canonical
//!   record, with the reason it was flagged
//! - **Burst groups** - every burst with its members in sequence order
//!
//! Filters select by device and upload time. A pair or group is reported
//! whole even when some of its members fall outside the time range.

mod explanation;
mod export;

pub use explanation::explain;
pub use export::{export_bursts_csv, export_duplicates_csv};

use crate::core::record::{
    BurstGroupId, DeviceId, DuplicateMatch, MediaRecord, RecordFilter, RecordId,
};
use crate::core::store::RecordStore;
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A duplicate record and the canonical record it points at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicatePair {
    pub device: DeviceId,
    pub duplicate: RecordId,
    pub duplicate_location: String,
    pub duplicate_uploaded: DateTime<Utc>,
    pub canonical: RecordId,
    /// Absent when the canonical record no longer exists
    pub canonical_location: Option<String>,
    pub matched: Option<DuplicateMatch>,
    /// One-line reason for the flag
    pub explanation: String,
}

/// One member of a burst
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurstMember {
    pub record: RecordId,
    pub sequence: u32,
    pub location: String,
    pub captured_at: Option<DateTime<Utc>>,
    pub is_duplicate: bool,
}

/// A burst with its members in sequence order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurstGroupReport {
    pub group_id: BurstGroupId,
    pub device: DeviceId,
    pub members: Vec<BurstMember>,
}

impl BurstGroupReport {
    /// Time between the first and last capture
    pub fn span_ms(&self) -> i64 {
        let times: Vec<DateTime<Utc>> =
            self.members.iter().filter_map(|m| m.captured_at).collect();
        match (times.iter().min(), times.iter().max()) {
            (Some(first), Some(last)) => (*last - *first).num_milliseconds(),
            _ => 0,
        }
    }
}

/// List flagged duplicates, in upload order of the duplicate
pub fn duplicate_pairs(
    store: &dyn RecordStore,
    filter: &RecordFilter,
) -> Result<Vec<DuplicatePair>, StoreError> {
    let selected = store.select(filter)?;
    let by_id: HashMap<RecordId, &MediaRecord> = selected.iter().map(|r| (r.id, r)).collect();

    let mut pairs = Vec::new();
    for record in selected.iter().filter(|r| r.is_duplicate) {
        let Some(canonical_id) = record.duplicate_of else {
            continue;
        };
        let canonical = match by_id.get(&canonical_id) {
            Some(c) => Some((*c).clone()),
            None => store.get(canonical_id)?,
        };

        pairs.push(DuplicatePair {
            device: record.device_id.clone(),
            duplicate: record.id,
            duplicate_location: record.location.clone(),
            duplicate_uploaded: record.upload_timestamp,
            canonical: canonical_id,
            canonical_location: canonical.map(|c| c.location),
            matched: record.duplicate_match,
            explanation: explain(record.duplicate_match, canonical_id),
        });
    }

    Ok(pairs)
}

/// List burst groups touched by the selection, ordered by device then
/// first capture
pub fn burst_groups(
    store: &dyn RecordStore,
    filter: &RecordFilter,
) -> Result<Vec<BurstGroupReport>, StoreError> {
    let selected = store.select(filter)?;

    let mut wanted: BTreeMap<DeviceId, BTreeSet<BurstGroupId>> = BTreeMap::new();
    for record in &selected {
        if let Some(ref group) = record.burst_group_id {
            wanted
                .entry(record.device_id.clone())
                .or_default()
                .insert(group.clone());
        }
    }

    let mut reports = Vec::new();
    for (device, groups) in wanted {
        let mut members: BTreeMap<BurstGroupId, Vec<MediaRecord>> = BTreeMap::new();
        for record in store.device_records(&device)? {
            if let Some(group) = record.burst_group_id.clone().filter(|g| groups.contains(g)) {
                members.entry(group).or_default().push(record);
            }
        }

        let mut device_reports: Vec<BurstGroupReport> = members
            .into_iter()
            .map(|(group_id, mut records)| {
                records.sort_by_key(|r| (r.burst_sequence, r.id));
                BurstGroupReport {
                    group_id,
                    device: device.clone(),
                    members: records
                        .into_iter()
                        .map(|r| BurstMember {
                            record: r.id,
                            sequence: r.burst_sequence.unwrap_or(0),
                            location: r.location,
                            captured_at: r.capture_timestamp,
                            is_duplicate: r.is_duplicate,
                        })
                        .collect(),
                }
            })
            .collect();
        device_reports.sort_by_key(|g| g.members.first().and_then(|m| m.captured_at));
        reports.extend(device_reports);
    }

    Ok(reports)
}
