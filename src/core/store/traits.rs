//! Record store trait definition.

use super::StoreStats;
use crate::core::record::{DeviceId, MediaRecord, NewMediaRecord, RecordFilter, RecordId};
use crate::error::StoreError;

/// Trait for record store backends
pub trait RecordStore: Send + Sync {
    /// Persist a freshly ingested record and assign its id
    fn insert(&self, record: NewMediaRecord) -> Result<MediaRecord, StoreError>;

    /// Fetch a single record
    fn get(&self, id: RecordId) -> Result<Option<MediaRecord>, StoreError>;

    /// All records of one device, in upload order
    fn device_records(&self, device: &DeviceId) -> Result<Vec<MediaRecord>, StoreError>;

    /// Records matching a filter, in upload order
    fn select(&self, filter: &RecordFilter) -> Result<Vec<MediaRecord>, StoreError>;

    /// Write a set of updated records atomically.
    ///
    /// Every record's `revision` must equal the stored revision, otherwise
    /// nothing is written and `StoreError::Conflict` is returned. A content
    /// hash, once stored, is never replaced. Returns the committed records
    /// with their new revisions.
    fn commit(&self, changes: &[MediaRecord]) -> Result<Vec<MediaRecord>, StoreError>;

    /// Clear duplicate and burst state (and the resolved marker) for every
    /// record matching the filter. Manual overrides survive.
    ///
    /// Returns the number of records reset.
    fn reset(&self, filter: &RecordFilter) -> Result<usize, StoreError>;

    /// Get store statistics
    fn stats(&self) -> Result<StoreStats, StoreError>;
}
