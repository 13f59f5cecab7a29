//! In-memory record store for tests and dry runs.

use super::{apply_change, RecordStore, StoreStats};
use crate::core::record::{DeviceId, MediaRecord, NewMediaRecord, RecordFilter, RecordId};
use crate::error::StoreError;
use std::collections::BTreeMap;
use std::sync::RwLock;

#[derive(Default)]
struct State {
    records: BTreeMap<RecordId, MediaRecord>,
    next_id: i64,
}

/// In-memory record store
///
/// Useful for testing and for dry runs over a snapshot.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with existing records (ids preserved)
    pub fn from_records(records: impl IntoIterator<Item = MediaRecord>) -> Self {
        let mut state = State::default();
        for record in records {
            state.next_id = state.next_id.max(record.id.0);
            state.records.insert(record.id, record);
        }
        Self {
            state: RwLock::new(state),
        }
    }

    fn sorted(mut records: Vec<MediaRecord>) -> Vec<MediaRecord> {
        records.sort_by(|a, b| a.upload_order(b));
        records
    }
}

impl RecordStore for InMemoryStore {
    fn insert(&self, record: NewMediaRecord) -> Result<MediaRecord, StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        state.next_id += 1;
        let stored = MediaRecord::from_new(RecordId(state.next_id), record);
        state.records.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn get(&self, id: RecordId) -> Result<Option<MediaRecord>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.records.get(&id).cloned())
    }

    fn device_records(&self, device: &DeviceId) -> Result<Vec<MediaRecord>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(Self::sorted(
            state
                .records
                .values()
                .filter(|r| &r.device_id == device)
                .cloned()
                .collect(),
        ))
    }

    fn select(&self, filter: &RecordFilter) -> Result<Vec<MediaRecord>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(Self::sorted(
            state
                .records
                .values()
                .filter(|r| filter.matches(r))
                .cloned()
                .collect(),
        ))
    }

    fn commit(&self, changes: &[MediaRecord]) -> Result<Vec<MediaRecord>, StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;

        // Validate everything before touching anything
        for change in changes {
            let stored = state
                .records
                .get(&change.id)
                .ok_or(StoreError::NotFound { id: change.id.0 })?;
            if stored.revision != change.revision {
                return Err(StoreError::Conflict {
                    id: change.id.0,
                    expected: change.revision,
                    found: stored.revision,
                });
            }
        }

        let mut committed = Vec::with_capacity(changes.len());
        for change in changes {
            if let Some(stored) = state.records.get_mut(&change.id) {
                apply_change(stored, change);
                committed.push(stored.clone());
            }
        }
        Ok(committed)
    }

    fn reset(&self, filter: &RecordFilter) -> Result<usize, StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        let mut count = 0;
        for record in state.records.values_mut().filter(|r| filter.matches(r)) {
            record.clear_resolution();
            record.revision += 1;
            count += 1;
        }
        Ok(count)
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(StoreStats::from_records(state.records.values()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hasher::ContentHasher;
    use crate::core::record::BurstGroupId;
    use chrono::{TimeZone, Utc};

    fn new_record(device: &str, minute: u32) -> NewMediaRecord {
        NewMediaRecord::new(
            DeviceId::new(device),
            format!("/cam/{}/{}.jpg", device, minute),
            Utc.with_ymd_and_hms(2024, 6, 1, 8, minute, 0).unwrap(),
        )
    }

    #[test]
    fn insert_assigns_increasing_ids() {
        let store = InMemoryStore::new();
        let a = store.insert(new_record("c1", 0)).unwrap();
        let b = store.insert(new_record("c1", 1)).unwrap();
        assert!(a.id < b.id);
        assert_eq!(a.revision, 0);
    }

    #[test]
    fn device_records_are_in_upload_order() {
        let store = InMemoryStore::new();
        store.insert(new_record("c1", 5)).unwrap();
        store.insert(new_record("c2", 1)).unwrap();
        store.insert(new_record("c1", 2)).unwrap();

        let records = store.device_records(&DeviceId::new("c1")).unwrap();
        let minutes: Vec<_> = records.iter().map(|r| r.location.clone()).collect();
        assert_eq!(minutes, vec!["/cam/c1/2.jpg", "/cam/c1/5.jpg"]);
    }

    #[test]
    fn commit_bumps_revision() {
        let store = InMemoryStore::new();
        let mut record = store.insert(new_record("c1", 0)).unwrap();
        record.resolved = true;

        let committed = store.commit(&[record]).unwrap();

        assert_eq!(committed[0].revision, 1);
        assert!(store.get(committed[0].id).unwrap().unwrap().resolved);
    }

    #[test]
    fn stale_revision_conflicts_and_writes_nothing() {
        let store = InMemoryStore::new();
        let a = store.insert(new_record("c1", 0)).unwrap();
        let b = store.insert(new_record("c1", 1)).unwrap();

        let mut fresh = a.clone();
        fresh.resolved = true;
        store.commit(&[fresh]).unwrap();

        let mut stale = a.clone();
        stale.is_duplicate = true;
        let mut sibling = b.clone();
        sibling.burst_group_id = Some(BurstGroupId("burst_00000000".into()));
        sibling.burst_sequence = Some(1);

        let result = store.commit(&[sibling, stale]);

        assert!(matches!(result, Err(StoreError::Conflict { .. })));
        assert!(!store.get(b.id).unwrap().unwrap().in_burst());
    }

    #[test]
    fn content_hash_is_never_replaced() {
        let store = InMemoryStore::new();
        let hasher = ContentHasher::new();
        let mut record = store.insert(new_record("c1", 0)).unwrap();
        record.content_hash = Some(hasher.compute_content_hash(b"first"));
        let mut record = store.commit(&[record]).unwrap().remove(0);

        record.content_hash = Some(hasher.compute_content_hash(b"second"));
        let record = store.commit(&[record]).unwrap().remove(0);

        assert_eq!(record.content_hash, Some(hasher.compute_content_hash(b"first")));
    }

    #[test]
    fn reset_respects_filter_and_keeps_override() {
        let store = InMemoryStore::new();
        let mut a = store.insert(new_record("c1", 0)).unwrap();
        let mut b = store.insert(new_record("c2", 0)).unwrap();
        a.resolved = true;
        a.not_duplicate_override = true;
        b.resolved = true;
        store.commit(&[a.clone(), b.clone()]).unwrap();

        let count = store
            .reset(&RecordFilter::all().device(DeviceId::new("c1")))
            .unwrap();

        assert_eq!(count, 1);
        let a = store.get(a.id).unwrap().unwrap();
        assert!(!a.resolved);
        assert!(a.not_duplicate_override);
        assert!(store.get(b.id).unwrap().unwrap().resolved);
    }
}
