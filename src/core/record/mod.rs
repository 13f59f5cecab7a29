//! # Record Module
//!
//! The media record model shared by every stage of the engine.
//!
//! A record is created once by ingestion, then its hash, duplicate and
//! burst fields are filled in by the resolution stages. `duplicate_of`
//! is a weak back-reference by id: canonical records always have it
//! empty, and it only ever points at an earlier upload.

use crate::core::hasher::{ContentDigest, PerceptualDigest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Identifier of a media record, assigned by the record store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the capture device (camera) that produced a record
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque identifier shared by all members of one burst
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BurstGroupId(pub String);

impl BurstGroupId {
    /// Mint a fresh group identifier (`burst_` + 8 hex characters)
    pub fn mint() -> Self {
        let simple = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("burst_{}", &simple[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BurstGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a record was flagged as a duplicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplicateMatch {
    /// Byte-identical content
    Exact,
    /// Perceptual hashes within the near-duplicate threshold
    Near { distance: u32 },
}

impl fmt::Display for DuplicateMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicateMatch::Exact => write!(f, "Exact Match"),
            DuplicateMatch::Near { distance } => write!(f, "Near Match ({} bits)", distance),
        }
    }
}

/// A record as handed over by the ingestion collaborator, before the
/// store assigns its id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMediaRecord {
    pub device_id: DeviceId,
    pub location: String,
    pub upload_timestamp: DateTime<Utc>,
    pub capture_timestamp: Option<DateTime<Utc>>,
}

impl NewMediaRecord {
    pub fn new(device_id: DeviceId, location: impl Into<String>, uploaded: DateTime<Utc>) -> Self {
        Self {
            device_id,
            location: location.into(),
            upload_timestamp: uploaded,
            capture_timestamp: None,
        }
    }

    pub fn captured_at(mut self, captured: DateTime<Utc>) -> Self {
        self.capture_timestamp = Some(captured);
        self
    }
}

/// The unit of work of the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub id: RecordId,
    pub device_id: DeviceId,
    /// Storage key of the raw bytes
    pub location: String,
    pub upload_timestamp: DateTime<Utc>,
    pub capture_timestamp: Option<DateTime<Utc>>,
    pub content_hash: Option<ContentDigest>,
    pub perceptual_hash: Option<PerceptualDigest>,
    pub is_duplicate: bool,
    pub duplicate_of: Option<RecordId>,
    pub duplicate_match: Option<DuplicateMatch>,
    pub burst_group_id: Option<BurstGroupId>,
    pub burst_sequence: Option<u32>,
    /// Set once a full resolution pass has completed for this record
    pub resolved: bool,
    /// Manual "not a duplicate" decision; never re-derived
    pub not_duplicate_override: bool,
    /// Optimistic concurrency counter, bumped by every commit
    pub revision: u64,
}

impl MediaRecord {
    /// Build the stored form of a freshly ingested record
    pub fn from_new(id: RecordId, new: NewMediaRecord) -> Self {
        Self {
            id,
            device_id: new.device_id,
            location: new.location,
            upload_timestamp: new.upload_timestamp,
            capture_timestamp: new.capture_timestamp,
            content_hash: None,
            perceptual_hash: None,
            is_duplicate: false,
            duplicate_of: None,
            duplicate_match: None,
            burst_group_id: None,
            burst_sequence: None,
            resolved: false,
            not_duplicate_override: false,
            revision: 0,
        }
    }

    /// Ordering used for canonical election: earliest upload, then lowest id
    pub fn upload_order(&self, other: &MediaRecord) -> Ordering {
        self.upload_timestamp
            .cmp(&other.upload_timestamp)
            .then(self.id.cmp(&other.id))
    }

    /// Ordering used for burst sequences: earliest capture, then lowest id
    pub fn capture_order(&self, other: &MediaRecord) -> Ordering {
        self.capture_timestamp
            .cmp(&other.capture_timestamp)
            .then(self.id.cmp(&other.id))
    }

    /// Drop duplicate and burst state, keeping hashes and overrides
    pub fn clear_resolution(&mut self) {
        self.is_duplicate = false;
        self.duplicate_of = None;
        self.duplicate_match = None;
        self.burst_group_id = None;
        self.burst_sequence = None;
        self.resolved = false;
    }

    pub fn in_burst(&self) -> bool {
        self.burst_group_id.is_some()
    }
}

/// Selects a subset of records for reprocessing and reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordFilter {
    pub device: Option<DeviceId>,
    /// Inclusive lower bound on the upload timestamp
    pub uploaded_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the upload timestamp
    pub uploaded_to: Option<DateTime<Utc>>,
}

impl RecordFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn device(mut self, device: DeviceId) -> Self {
        self.device = Some(device);
        self
    }

    pub fn uploaded_between(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.uploaded_from = from;
        self.uploaded_to = to;
        self
    }

    pub fn matches(&self, record: &MediaRecord) -> bool {
        if let Some(ref device) = self.device {
            if &record.device_id != device {
                return false;
            }
        }
        if let Some(from) = self.uploaded_from {
            if record.upload_timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.uploaded_to {
            if record.upload_timestamp > to {
                return false;
            }
        }
        true
    }
}
