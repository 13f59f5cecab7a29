//! # Batch Module
//!
//! Reprocesses stored records in bounded batches.
//!
//! ## Modes
//! - **Incremental** (default) - only records that are not yet resolved
//!   and carry no manual override
//! - **Reset** - clear duplicate and burst state on the selection first,
//!   then resolve every selected record again
//! - **Dry run** - run against an in-memory snapshot and report what
//!   would change; the real store is never written
//!
//! Every record commits atomically, so an interrupted run can simply be
//! started again: whatever is still unresolved is picked up.

mod options;

pub use options::BatchOptions;
pub use crate::events::BatchSummary;

use crate::core::pipeline::{CancellationToken, Pipeline, RecordOutcome};
use crate::core::record::{DeviceId, MediaRecord, RecordFilter, RecordId};
use crate::core::resolver::DuplicateVerdict;
use crate::core::store::{InMemoryStore, RecordStore};
use crate::error::EngineError;
use crate::events::{null_sender, BatchEvent, BatchProgress, EventSender, RecordEvent};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// A record whose resolution failed during a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordFailure {
    pub record: RecordId,
    pub message: String,
}

/// Result of a batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub summary: BatchSummary,
    pub dry_run: bool,
    pub cancelled: bool,
    /// Outcomes of every processed record, in processing order
    pub outcomes: Vec<RecordOutcome>,
    pub failures: Vec<RecordFailure>,
}

/// Drives the pipeline over a selection of stored records
pub struct BatchCoordinator {
    pipeline: Pipeline,
}

impl BatchCoordinator {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Run without events or cancellation
    pub fn run(&self, options: &BatchOptions) -> Result<BatchReport, EngineError> {
        self.run_with_events(options, &null_sender(), &CancellationToken::new())
    }

    /// Run with progress events and cooperative cancellation.
    ///
    /// Per-record failures are counted and reported; only failures to
    /// read or reset the selection abort the run.
    pub fn run_with_events(
        &self,
        options: &BatchOptions,
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, EngineError> {
        let start_time = Instant::now();
        let target = self.target_pipeline(options)?;
        let store = target.store();

        if options.reset {
            let cleared = store.reset(&options.filter)?;
            info!(records = cleared, dry_run = options.dry_run, "reset duplicate and burst state");
            events.batch(BatchEvent::ResetApplied { records: cleared });
        }

        let selected = store.select(&options.filter)?;
        let selected_count = selected.len();
        let queue: Vec<MediaRecord> = selected
            .into_iter()
            .filter(|r| options.reset || (!r.resolved && !r.not_duplicate_override))
            .collect();
        let skipped = selected_count - queue.len();

        events.batch(BatchEvent::Started {
            selected: selected_count,
            to_process: queue.len(),
            dry_run: options.dry_run,
        });
        info!(
            selected = selected_count,
            to_process = queue.len(),
            skipped,
            dry_run = options.dry_run,
            "batch started"
        );

        let batch_size = options
            .batch_size
            .unwrap_or(target.config().batch_size)
            .max(1);
        let batches = queue.len().div_ceil(batch_size);

        let mut outcomes = Vec::with_capacity(queue.len());
        let mut failures = Vec::new();
        let mut cancelled = false;

        for (index, chunk) in queue.chunks(batch_size).enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            for result in self.run_chunk(&target, chunk, events, cancel) {
                match result {
                    ChunkResult::Done(outcome) => outcomes.push(outcome),
                    ChunkResult::Failed(failure) => failures.push(failure),
                    ChunkResult::Cancelled => cancelled = true,
                }
            }

            events.batch(BatchEvent::Progress(BatchProgress {
                batch: index + 1,
                batches,
                processed: outcomes.len() + failures.len(),
                total: queue.len(),
                failures: failures.len(),
            }));
            debug!(batch = index + 1, batches, "batch finished");

            if cancelled {
                break;
            }
        }

        let summary = BatchSummary {
            processed: outcomes.len(),
            new_duplicates: outcomes.iter().map(RecordOutcome::new_duplicates).sum(),
            new_burst_groups: outcomes.iter().filter(|o| o.minted_group()).count(),
            failures: failures.len(),
            skipped,
            elapsed_ms: start_time.elapsed().as_millis() as u64,
        };

        if cancelled {
            warn!(processed = summary.processed, "batch cancelled");
            events.batch(BatchEvent::Cancelled {
                processed: summary.processed,
            });
        }
        events.batch(BatchEvent::Completed {
            summary: summary.clone(),
        });
        info!(
            processed = summary.processed,
            new_duplicates = summary.new_duplicates,
            new_burst_groups = summary.new_burst_groups,
            failures = summary.failures,
            elapsed_ms = summary.elapsed_ms,
            "batch completed"
        );

        Ok(BatchReport {
            summary,
            dry_run: options.dry_run,
            cancelled,
            outcomes,
            failures,
        })
    }

    /// The pipeline a run writes through: the real one, or one bound to
    /// a snapshot of every device the selection touches
    fn target_pipeline(&self, options: &BatchOptions) -> Result<Pipeline, EngineError> {
        if !options.dry_run {
            return Ok(self.pipeline.clone());
        }

        // Whole devices are copied so candidate pools stay complete
        let scope = match options.filter.device {
            Some(ref device) => RecordFilter::all().device(device.clone()),
            None => RecordFilter::all(),
        };
        let snapshot = InMemoryStore::from_records(self.pipeline.store().select(&scope)?);
        debug!("dry run against an in-memory snapshot");
        Ok(self.pipeline.with_store(Arc::new(snapshot)))
    }

    /// Devices in parallel; one device's records in upload order
    fn run_chunk(
        &self,
        target: &Pipeline,
        chunk: &[MediaRecord],
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> Vec<ChunkResult> {
        let mut by_device: BTreeMap<&DeviceId, Vec<RecordId>> = BTreeMap::new();
        for record in chunk {
            by_device.entry(&record.device_id).or_default().push(record.id);
        }
        let lanes: Vec<Vec<RecordId>> = by_device.into_values().collect();

        let work = || -> Vec<ChunkResult> {
            lanes
                .par_iter()
                .flat_map_iter(|lane| {
                    let mut results = Vec::with_capacity(lane.len());
                    for &id in lane {
                        if cancel.is_cancelled() {
                            results.push(ChunkResult::Cancelled);
                            break;
                        }
                        results.push(Self::process_one(target, id, events));
                    }
                    results
                })
                .collect()
        };

        match target.config().workers {
            0 => work(),
            workers => match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
                Ok(pool) => pool.install(work),
                Err(e) => {
                    warn!(error = %e, "worker pool unavailable; using the global pool");
                    work()
                }
            },
        }
    }

    fn process_one(target: &Pipeline, id: RecordId, events: &EventSender) -> ChunkResult {
        match target.process_record(id) {
            Ok(outcome) => {
                let event = match outcome.verdict {
                    DuplicateVerdict::Unknown => RecordEvent::Deferred { record: id },
                    DuplicateVerdict::Duplicate { canonical, .. } => RecordEvent::Resolved {
                        record: id,
                        duplicate_of: Some(canonical),
                        burst_group: outcome.burst.as_ref().map(|b| b.group_id.clone()),
                    },
                    DuplicateVerdict::NotDuplicate => RecordEvent::Resolved {
                        record: id,
                        duplicate_of: None,
                        burst_group: outcome.burst.as_ref().map(|b| b.group_id.clone()),
                    },
                };
                events.record(event);
                ChunkResult::Done(outcome)
            }
            Err(e) => {
                warn!(record = %id, error = %e, "record failed; continuing");
                events.record(RecordEvent::Failed {
                    record: id,
                    message: e.to_string(),
                });
                ChunkResult::Failed(RecordFailure {
                    record: id,
                    message: e.to_string(),
                })
            }
        }
    }
}

enum ChunkResult {
    Done(RecordOutcome),
    Failed(RecordFailure),
    Cancelled,
}
