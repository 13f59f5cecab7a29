//! Per-device critical sections.
//!
//! Duplicate resolution reads sibling state and burst grouping rewrites
//! it, so every resolution for one device runs under that device's lock.
//! Different devices never contend.

use crate::core::record::DeviceId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Registry of one mutex per device
#[derive(Default)]
pub struct DeviceLocks {
    locks: Mutex<HashMap<DeviceId, Arc<Mutex<()>>>>,
}

impl DeviceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (or create) the lock guarding a device
    pub fn lock_for(&self, device: &DeviceId) -> Arc<Mutex<()>> {
        // A poisoned registry still holds valid locks
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(device.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn device_count(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }
}
