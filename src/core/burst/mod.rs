//! # Burst Module
//!
//! Groups rapid-fire captures from one device into ordered bursts.
//!
//! Two captures belong to the same burst when a chain of captures links
//! them with no gap wider than the burst window. On a single time axis
//! that chain closure is a maximal run of the capture-ordered records,
//! so the cluster is found by sweeping outwards from the new record.
//!
//! ## Group Election
//! - No member grouped yet: a fresh group id is minted
//! - One or more existing groups: the cluster joins (or merges into) the
//!   group holding the earliest captured member
//!
//! Sequences are renumbered over the whole group in capture order, so a
//! late arrival with an early timestamp still slots into place. The
//! resulting plan may rewrite sibling records; callers must apply it
//! inside the device's critical section.

use crate::core::config::EngineConfig;
use crate::core::record::{BurstGroupId, MediaRecord, RecordId};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// New burst fields for one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurstAssignment {
    pub record: RecordId,
    pub group_id: BurstGroupId,
    pub sequence: u32,
}

/// Result of grouping one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurstPlan {
    pub group_id: BurstGroupId,
    /// True when `group_id` was minted by this plan
    pub minted: bool,
    /// Records whose burst fields change; empty when already consistent
    pub assignments: Vec<BurstAssignment>,
}

impl BurstPlan {
    pub fn is_noop(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn assignment_for(&self, id: RecordId) -> Option<&BurstAssignment> {
        self.assignments.iter().find(|a| a.record == id)
    }

    /// Write the plan's assignment (if any) onto a record
    pub fn apply_to(&self, record: &mut MediaRecord) -> bool {
        match self.assignment_for(record.id) {
            Some(assignment) => {
                record.burst_group_id = Some(assignment.group_id.clone());
                record.burst_sequence = Some(assignment.sequence);
                true
            }
            None => false,
        }
    }
}

/// Burst grouper
#[derive(Debug, Clone)]
pub struct BurstGrouper {
    window: Duration,
}

impl BurstGrouper {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.burst_window())
    }

    /// Group a record with the other captures of its device.
    ///
    /// Returns `None` when the record has no capture timestamp or no
    /// capture within the window chain. The pool may contain the record.
    pub fn group(&self, record: &MediaRecord, pool: &[MediaRecord]) -> Option<BurstPlan> {
        record.capture_timestamp?;

        let mut timeline: Vec<&MediaRecord> = pool
            .iter()
            .filter(|c| {
                c.id != record.id
                    && c.device_id == record.device_id
                    && c.capture_timestamp.is_some()
            })
            .chain(std::iter::once(record))
            .collect();
        timeline.sort_by(|a, b| a.capture_order(b));

        let index = timeline.iter().position(|c| c.id == record.id)?;
        let linked = |a: &MediaRecord, b: &MediaRecord| match (a.capture_timestamp, b.capture_timestamp) {
            (Some(ta), Some(tb)) => (tb - ta).abs() <= self.window,
            _ => false,
        };

        let mut start = index;
        while start > 0 && linked(timeline[start - 1], timeline[start]) {
            start -= 1;
        }
        let mut end = index;
        while end + 1 < timeline.len() && linked(timeline[end], timeline[end + 1]) {
            end += 1;
        }

        if start == end {
            return None;
        }

        let cluster = &timeline[start..=end];

        // Earliest grouped member decides the surviving group
        let existing = cluster.iter().find_map(|c| c.burst_group_id.clone());
        let (group_id, minted) = match existing {
            Some(group) => (group, false),
            None => (BurstGroupId::mint(), true),
        };

        // Every group touched by the cluster is folded into the survivor,
        // including members that are no longer chained to it.
        let involved: HashSet<&BurstGroupId> = cluster
            .iter()
            .filter_map(|c| c.burst_group_id.as_ref())
            .collect();
        let mut members: Vec<&MediaRecord> = cluster.to_vec();
        let cluster_ids: HashSet<RecordId> = cluster.iter().map(|c| c.id).collect();
        members.extend(timeline.iter().copied().filter(|c| {
            !cluster_ids.contains(&c.id)
                && c.burst_group_id.as_ref().is_some_and(|g| involved.contains(g))
        }));
        members.sort_by(|a, b| a.capture_order(b));

        let assignments: Vec<BurstAssignment> = members
            .iter()
            .enumerate()
            .filter_map(|(i, member)| {
                let sequence = (i + 1) as u32;
                let unchanged = member.burst_group_id.as_ref() == Some(&group_id)
                    && member.burst_sequence == Some(sequence);
                (!unchanged).then(|| BurstAssignment {
                    record: member.id,
                    group_id: group_id.clone(),
                    sequence,
                })
            })
            .collect();

        debug!(
            record = %record.id,
            group = %group_id,
            minted,
            members = members.len(),
            rewrites = assignments.len(),
            "burst grouped"
        );

        Some(BurstPlan {
            group_id,
            minted,
            assignments,
        })
    }
}

impl Default for BurstGrouper {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}
