//! # Core Module
//!
//! The capture resolution engine.
//!
//! ## Modules
//! - `record` - The media record model and selection filters
//! - `hasher` - Content and perceptual fingerprints
//! - `resolver` - Exact and near duplicate resolution, manual overrides
//! - `burst` - Temporal burst grouping
//! - `pipeline` - Ordered resolution stages and per-device locking
//! - `batch` - Filtered, restartable reprocessing
//! - `store` - Record persistence (in-memory and SQLite)
//! - `metadata` - Capture time extraction from EXIF
//! - `reporter` - Duplicate and burst listings
//! - `config` - Engine tunables

pub mod batch;
pub mod burst;
pub mod config;
pub mod hasher;
pub mod metadata;
pub mod pipeline;
pub mod record;
pub mod reporter;
pub mod resolver;
pub mod store;

// Re-export commonly used types
pub use batch::{BatchCoordinator, BatchOptions, BatchReport, BatchSummary};
pub use burst::{BurstGrouper, BurstPlan};
pub use config::EngineConfig;
pub use hasher::{ContentHasher, PerceptualHasher};
pub use pipeline::{Pipeline, RecordOutcome};
pub use record::{BurstGroupId, DeviceId, MediaRecord, NewMediaRecord, RecordFilter, RecordId};
pub use resolver::{mark_not_duplicate, DuplicateResolver, DuplicateVerdict};
pub use store::{InMemoryStore, RecordStore, SqliteStore};
