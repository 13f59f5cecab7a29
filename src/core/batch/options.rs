//! Batch run options.

use crate::core::record::{DeviceId, RecordFilter};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What to reprocess and how
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOptions {
    /// Device and upload-time selection
    pub filter: RecordFilter,
    /// Report intended outcomes without writing
    pub dry_run: bool,
    /// Clear duplicate and burst state on the selection first
    pub reset: bool,
    /// Records per batch; falls back to the engine config
    pub batch_size: Option<usize>,
}

impl BatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(mut self, device: DeviceId) -> Self {
        self.filter.device = Some(device);
        self
    }

    pub fn uploaded_between(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.filter = self.filter.uploaded_between(from, to);
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }
}
