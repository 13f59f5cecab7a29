//! # Store Module
//!
//! Persists media records and their resolution state.
//!
//! ## Guarantees
//! - One commit writes all of its records or none of them
//! - Commits are validated against each record's revision, so a stale
//!   read never overwrites a newer write
//! - Content hashes are write-once
//!
//! ## Backends
//! - `SqliteStore` - Persistent storage using SQLite
//! - `InMemoryStore` - For testing and dry runs

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::RecordStore;

use crate::core::record::{BurstGroupId, MediaRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_records: usize,
    pub duplicates: usize,
    pub burst_groups: usize,
    pub unresolved: usize,
    pub overridden: usize,
}

impl StoreStats {
    pub fn from_records<'a>(records: impl Iterator<Item = &'a MediaRecord>) -> Self {
        let mut stats = StoreStats::default();
        let mut groups: HashSet<&BurstGroupId> = HashSet::new();

        for record in records {
            stats.total_records += 1;
            if record.is_duplicate {
                stats.duplicates += 1;
            }
            if !record.resolved {
                stats.unresolved += 1;
            }
            if record.not_duplicate_override {
                stats.overridden += 1;
            }
            if let Some(ref group) = record.burst_group_id {
                groups.insert(group);
            }
        }

        stats.burst_groups = groups.len();
        stats
    }
}

/// Copy the mutable fields of `change` onto `stored` and bump the revision
pub(crate) fn apply_change(stored: &mut MediaRecord, change: &MediaRecord) {
    if stored.content_hash.is_none() {
        stored.content_hash = change.content_hash.clone();
    }
    stored.perceptual_hash = change.perceptual_hash.clone();
    stored.capture_timestamp = change.capture_timestamp;
    stored.is_duplicate = change.is_duplicate;
    stored.duplicate_of = change.duplicate_of;
    stored.duplicate_match = change.duplicate_match;
    stored.burst_group_id = change.burst_group_id.clone();
    stored.burst_sequence = change.burst_sequence;
    stored.resolved = change.resolved;
    stored.not_duplicate_override = change.not_duplicate_override;
    stored.revision += 1;
}
