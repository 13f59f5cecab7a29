//! Event type definitions for progress reporting.

use crate::core::record::{BurstGroupId, RecordId};
use serde::{Deserialize, Serialize};

/// All events emitted by the resolution engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// Batch reprocessing events
    Batch(BatchEvent),
    /// Per-record events
    Record(RecordEvent),
}

/// Events during a batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BatchEvent {
    /// The batch has selected its records
    Started {
        selected: usize,
        to_process: usize,
        dry_run: bool,
    },
    /// Duplicate and burst state was cleared on the selection
    ResetApplied { records: usize },
    /// One bounded batch finished
    Progress(BatchProgress),
    /// The run stopped early on request
    Cancelled { processed: usize },
    /// The run finished
    Completed { summary: BatchSummary },
}

/// Progress information after each bounded batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchProgress {
    /// 1-based index of the batch just finished
    pub batch: usize,
    pub batches: usize,
    /// Records processed so far
    pub processed: usize,
    /// Records to process in total
    pub total: usize,
    pub failures: usize,
}

/// Events for individual records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RecordEvent {
    Resolved {
        record: RecordId,
        duplicate_of: Option<RecordId>,
        burst_group: Option<BurstGroupId>,
    },
    /// Left unresolved; picked up again by the next run
    Deferred { record: RecordId },
    Failed { record: RecordId, message: String },
}

/// Summary of a batch run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Records that went through resolution
    pub processed: usize,
    /// Records that became duplicates during the run
    pub new_duplicates: usize,
    /// Burst groups minted during the run
    pub new_burst_groups: usize,
    /// Records whose resolution failed
    pub failures: usize,
    /// Selected records left alone (already resolved or overridden)
    pub skipped: usize,
    /// Duration in milliseconds
    pub elapsed_ms: u64,
}

impl BatchEvent {
    pub fn label(&self) -> &'static str {
        match self {
            BatchEvent::Started { .. } => "started",
            BatchEvent::ResetApplied { .. } => "reset",
            BatchEvent::Progress(_) => "progress",
            BatchEvent::Cancelled { .. } => "cancelled",
            BatchEvent::Completed { .. } => "completed",
        }
    }
}
