//! Manual "not a duplicate" override.

use crate::core::pipeline::DeviceLocks;
use crate::core::record::{MediaRecord, RecordId};
use crate::core::store::RecordStore;
use crate::error::{OverrideError, StoreError};
use tracing::info;

/// Clear a record's duplicate status for good.
///
/// The record keeps `not_duplicate_override` set, so no later run
/// re-derives its duplicate status. Records that are not flagged are
/// rejected with `OverrideError::NotFlagged` and left untouched.
pub fn mark_not_duplicate(
    store: &dyn RecordStore,
    locks: &DeviceLocks,
    id: RecordId,
) -> Result<MediaRecord, OverrideError> {
    let device = store
        .get(id)?
        .ok_or(OverrideError::NotFound { id: id.0 })?
        .device_id;

    let lock = locks.lock_for(&device);
    let _guard = lock.lock().map_err(|_| StoreError::Poisoned)?;

    // Re-read under the device lock
    let mut record = store.get(id)?.ok_or(OverrideError::NotFound { id: id.0 })?;
    if !record.is_duplicate {
        return Err(OverrideError::NotFlagged { id: id.0 });
    }

    let previous = record.duplicate_of;
    record.is_duplicate = false;
    record.duplicate_of = None;
    record.duplicate_match = None;
    record.not_duplicate_override = true;
    record.resolved = true;

    let committed = store
        .commit(&[record])?
        .into_iter()
        .next()
        .ok_or(OverrideError::NotFound { id: id.0 })?;
    info!(record = %id, previous = ?previous, "marked not a duplicate");
    Ok(committed)
}
