//! # Pipeline Module
//!
//! Resolves records through an explicit, ordered set of stages.
//!
//! ## Pipeline Stages
//! 1. **Hash** - Content and perceptual fingerprints (independent)
//! 2. **Duplicate** - Exact then near duplicate resolution
//! 3. **Burst** - Temporal burst grouping, possibly rewriting siblings
//! 4. **Rebind** - Move duplicate links so each still points at a canonical root
//! 5. **Commit** - One atomic, revision-checked write of every changed record;
//!    skipped when nothing changed
//!
//! ## Concurrency
//! Stages 2-5 run under a per-device lock. Hashing runs outside it so
//! different records can be hashed in parallel.

mod executor;
mod locks;
mod source;
mod stages;

pub use executor::{CancellationToken, Pipeline, PipelineBuilder};
pub use locks::DeviceLocks;
pub use source::{FsMediaSource, MediaSource};
pub use stages::{
    burst_stage, duplicate_stage, plan_record, rebind_stage, BurstOutcome, HashStage, Rebind,
    RecordOutcome, RecordPlan,
};
