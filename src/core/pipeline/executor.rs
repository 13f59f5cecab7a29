//! Pipeline execution implementation.

use super::locks::DeviceLocks;
use super::source::{FsMediaSource, MediaSource};
use super::stages::{plan_record, HashStage, RecordOutcome};
use crate::core::burst::BurstGrouper;
use crate::core::config::EngineConfig;
use crate::core::hasher::{Hashers, PerceptualHasher};
use crate::core::record::{MediaRecord, NewMediaRecord, RecordId};
use crate::core::resolver::{self, DuplicateResolver};
use crate::core::store::{InMemoryStore, RecordStore};
use crate::error::{EngineError, HashError, OverrideError, ResolveError, StoreError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Commit attempts per record before giving up
const MAX_COMMIT_ATTEMPTS: usize = 2;

/// Cooperative cancellation flag shared with a running batch
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Builder for a pipeline
pub struct PipelineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn RecordStore>>,
    source: Option<Arc<dyn MediaSource>>,
    perceptual: Option<PerceptualHasher>,
}

impl PipelineBuilder {
    /// Create a new pipeline builder
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            store: None,
            source: None,
            perceptual: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the record store
    pub fn store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set where raw media bytes are read from
    pub fn source(mut self, source: Arc<dyn MediaSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Substitute the perceptual hashing algorithm
    pub fn perceptual(mut self, hasher: PerceptualHasher) -> Self {
        self.perceptual = Some(hasher);
        self
    }

    /// Build the pipeline
    pub fn build(self) -> Result<Pipeline, EngineError> {
        self.config.validate()?;

        Ok(Pipeline {
            resolver: Arc::new(DuplicateResolver::from_config(&self.config)),
            grouper: Arc::new(BurstGrouper::from_config(&self.config)),
            hashers: Arc::new(Hashers::new(self.perceptual.unwrap_or_default())),
            store: self.store.unwrap_or_else(|| Arc::new(InMemoryStore::new())),
            source: self.source.unwrap_or_else(|| Arc::new(FsMediaSource::new())),
            locks: Arc::new(DeviceLocks::new()),
            config: self.config,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The record resolution pipeline.
///
/// Runs hash, duplicate and burst stages for one record and commits the
/// resulting change set atomically under the record's device lock.
#[derive(Clone)]
pub struct Pipeline {
    config: EngineConfig,
    store: Arc<dyn RecordStore>,
    source: Arc<dyn MediaSource>,
    hashers: Arc<Hashers>,
    resolver: Arc<DuplicateResolver>,
    grouper: Arc<BurstGrouper>,
    locks: Arc<DeviceLocks>,
}

impl Pipeline {
    /// Create a new pipeline builder
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn locks(&self) -> &DeviceLocks {
        &self.locks
    }

    /// Same stages and media source, different store (used for dry runs)
    pub fn with_store(&self, store: Arc<dyn RecordStore>) -> Pipeline {
        Pipeline {
            store,
            locks: Arc::new(DeviceLocks::new()),
            ..self.clone()
        }
    }

    /// Store a freshly uploaded record and resolve it immediately.
    ///
    /// `bytes` is the already-read payload; the media source is not
    /// consulted for it.
    pub fn ingest(
        &self,
        new: NewMediaRecord,
        bytes: &[u8],
    ) -> Result<(MediaRecord, RecordOutcome), EngineError> {
        let record = self.store.insert(new)?;
        debug!(record = %record.id, device = %record.device_id, "ingested");

        let hashes = HashStage::compute(&self.hashers, &record, Ok(bytes.to_vec()));
        let outcome = self.resolve_with_hashes(record.id, hashes)?;

        let stored = self
            .store
            .get(record.id)?
            .ok_or(StoreError::NotFound { id: record.id.0 })?;
        Ok((stored, outcome))
    }

    /// Hash (if needed) and resolve one stored record
    pub fn process_record(&self, id: RecordId) -> Result<RecordOutcome, ResolveError> {
        let record = self
            .store
            .get(id)
            .map_err(|source| ResolveError::Record { id: id.0, source })?
            .ok_or(ResolveError::Record {
                id: id.0,
                source: StoreError::NotFound { id: id.0 },
            })?;

        // Hashing reads media, so it stays outside the device lock
        let hashes = if record.content_hash.is_none() {
            HashStage::compute(&self.hashers, &record, self.read(&record))
        } else {
            HashStage::default()
        };

        self.resolve_with_hashes(id, hashes)
    }

    /// Manual "not a duplicate" override, serialised with resolution
    pub fn mark_not_duplicate(&self, id: RecordId) -> Result<MediaRecord, OverrideError> {
        resolver::mark_not_duplicate(self.store.as_ref(), &self.locks, id)
    }

    fn read(&self, record: &MediaRecord) -> Result<Vec<u8>, HashError> {
        self.source.read(record)
    }

    fn resolve_with_hashes(
        &self,
        id: RecordId,
        hashes: HashStage,
    ) -> Result<RecordOutcome, ResolveError> {
        let wrap = |source: StoreError| ResolveError::Record { id: id.0, source };

        let device = self
            .store
            .get(id)
            .map_err(wrap)?
            .ok_or(StoreError::NotFound { id: id.0 })
            .map_err(wrap)?
            .device_id;

        let lock = self.locks.lock_for(&device);
        let _guard = lock.lock().map_err(|_| ResolveError::LockPoisoned {
            device: device.to_string(),
        })?;

        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let pool = self.store.device_records(&device).map_err(wrap)?;
            let Some(mut record) = pool.iter().find(|r| r.id == id).cloned() else {
                return Err(wrap(StoreError::NotFound { id: id.0 }));
            };
            hashes.apply_to(&mut record);

            let plan = plan_record(&self.resolver, &self.grouper, record, &pool);
            if plan.is_noop() {
                debug!(record = %id, verdict = ?plan.outcome.verdict, "record unchanged; nothing to commit");
                return Ok(plan.outcome);
            }

            match self.store.commit(&plan.changes) {
                Ok(_) => {
                    debug!(
                        record = %id,
                        verdict = ?plan.outcome.verdict,
                        siblings = plan.outcome.siblings_rewritten,
                        demoted = plan.outcome.demoted,
                        repointed = plan.outcome.repointed,
                        "record resolved"
                    );
                    if plan.outcome.newly_duplicate {
                        info!(record = %id, verdict = ?plan.outcome.verdict, "duplicate detected");
                    }
                    return Ok(plan.outcome);
                }
                Err(StoreError::Conflict { expected, found, .. }) => {
                    warn!(record = %id, attempt, expected, found, "commit conflict; retrying");
                }
                Err(e) => return Err(wrap(e)),
            }
        }

        Err(ResolveError::ConflictAfterRetry { id: id.0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::DeviceId;
    use crate::core::resolver::DuplicateVerdict;
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Serves payloads from memory, keyed by location
    #[derive(Default)]
    struct MapSource {
        payloads: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl MapSource {
        fn put(&self, location: &str, bytes: &[u8]) {
            self.payloads
                .lock()
                .unwrap()
                .insert(location.to_string(), bytes.to_vec());
        }
    }

    impl MediaSource for MapSource {
        fn read(&self, record: &MediaRecord) -> Result<Vec<u8>, HashError> {
            self.payloads
                .lock()
                .unwrap()
                .get(&record.location)
                .cloned()
                .ok_or_else(|| HashError::Io {
                    location: record.location.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
                })
        }
    }

    /// Store that reports a conflict on the first `failures` commits
    struct FlakyStore {
        inner: InMemoryStore,
        failures: AtomicUsize,
    }

    impl RecordStore for FlakyStore {
        fn insert(&self, record: NewMediaRecord) -> Result<MediaRecord, StoreError> {
            self.inner.insert(record)
        }
        fn get(&self, id: RecordId) -> Result<Option<MediaRecord>, StoreError> {
            self.inner.get(id)
        }
        fn device_records(&self, device: &DeviceId) -> Result<Vec<MediaRecord>, StoreError> {
            self.inner.device_records(device)
        }
        fn select(
            &self,
            filter: &crate::core::record::RecordFilter,
        ) -> Result<Vec<MediaRecord>, StoreError> {
            self.inner.select(filter)
        }
        fn commit(&self, changes: &[MediaRecord]) -> Result<Vec<MediaRecord>, StoreError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Conflict {
                    id: changes[0].id.0,
                    expected: changes[0].revision,
                    found: changes[0].revision + 1,
                });
            }
            self.inner.commit(changes)
        }
        fn reset(&self, filter: &crate::core::record::RecordFilter) -> Result<usize, StoreError> {
            self.inner.reset(filter)
        }
        fn stats(&self) -> Result<crate::core::store::StoreStats, StoreError> {
            self.inner.stats()
        }
    }

    fn upload(minute: u32) -> NewMediaRecord {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 10, minute, 0).unwrap();
        NewMediaRecord::new(DeviceId::new("cam-1"), format!("/m/{}.bin", minute), at)
    }

    #[test]
    fn ingest_flags_exact_copy_of_earlier_upload() {
        let pipeline = Pipeline::builder().build().unwrap();

        let (first, _) = pipeline.ingest(upload(0), b"payload").unwrap();
        let (second, outcome) = pipeline.ingest(upload(5), b"payload").unwrap();

        assert!(!first.is_duplicate);
        assert!(second.is_duplicate);
        assert_eq!(second.duplicate_of, Some(first.id));
        assert!(outcome.newly_duplicate);
        assert!(second.resolved);
        assert!(second.content_hash.is_some());
    }

    #[test]
    fn ingest_groups_burst_and_rewrites_sibling() {
        let pipeline = Pipeline::builder().build().unwrap();
        let base = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();

        let first = upload(0).captured_at(base);
        let second = upload(1).captured_at(base + Duration::seconds(1));

        let (first, _) = pipeline.ingest(first, b"one").unwrap();
        let (second, outcome) = pipeline.ingest(second, b"two").unwrap();
        let first = pipeline.store().get(first.id).unwrap().unwrap();

        assert!(outcome.minted_group());
        assert_eq!(first.burst_group_id, second.burst_group_id);
        assert_eq!(first.burst_sequence, Some(1));
        assert_eq!(second.burst_sequence, Some(2));
    }

    #[test]
    fn process_record_reads_media_source() {
        let source = Arc::new(MapSource::default());
        source.put("/m/0.bin", b"abc");
        let pipeline = Pipeline::builder().source(source).build().unwrap();

        let record = pipeline.store().insert(upload(0)).unwrap();
        let outcome = pipeline.process_record(record.id).unwrap();

        let stored = pipeline.store().get(record.id).unwrap().unwrap();
        assert_eq!(outcome.verdict, DuplicateVerdict::NotDuplicate);
        assert!(stored.resolved);
        assert_eq!(
            stored.content_hash.unwrap().as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn unreadable_media_stays_unresolved() {
        let pipeline = Pipeline::builder()
            .source(Arc::new(MapSource::default()))
            .build()
            .unwrap();

        let record = pipeline.store().insert(upload(0)).unwrap();
        let outcome = pipeline.process_record(record.id).unwrap();

        let stored = pipeline.store().get(record.id).unwrap().unwrap();
        assert_eq!(outcome.verdict, DuplicateVerdict::Unknown);
        assert!(!stored.resolved);
        assert!(!stored.is_duplicate);
    }

    #[test]
    fn unchanged_record_is_not_committed_again() {
        let pipeline = Pipeline::builder()
            .source(Arc::new(MapSource::default()))
            .build()
            .unwrap();

        let record = pipeline.store().insert(upload(0)).unwrap();
        pipeline.process_record(record.id).unwrap();
        pipeline.process_record(record.id).unwrap();

        let stored = pipeline.store().get(record.id).unwrap().unwrap();
        assert_eq!(stored.revision, 0);
    }

    #[test]
    fn recovered_media_takes_over_later_copies() {
        let source = Arc::new(MapSource::default());
        let pipeline = Pipeline::builder().source(source.clone()).build().unwrap();

        let early = pipeline.store().insert(upload(0)).unwrap();
        pipeline.process_record(early.id).unwrap();
        let (root, _) = pipeline.ingest(upload(5), b"frame").unwrap();
        let (copy, _) = pipeline.ingest(upload(10), b"frame").unwrap();
        assert_eq!(copy.duplicate_of, Some(root.id));

        source.put("/m/0.bin", b"frame");
        let outcome = pipeline.process_record(early.id).unwrap();

        let get = |id| pipeline.store().get(id).unwrap().unwrap();
        assert_eq!(outcome.verdict, DuplicateVerdict::NotDuplicate);
        assert_eq!(outcome.new_duplicates(), 1);
        assert!(!get(early.id).is_duplicate);
        assert_eq!(get(root.id).duplicate_of, Some(early.id));
        assert_eq!(get(copy.id).duplicate_of, Some(early.id));
    }

    #[test]
    fn single_conflict_is_retried() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryStore::new(),
            failures: AtomicUsize::new(1),
        });
        let pipeline = Pipeline::builder().store(store).build().unwrap();

        let (record, _) = pipeline.ingest(upload(0), b"x").unwrap();

        assert!(record.resolved);
    }

    #[test]
    fn repeated_conflict_fails_the_record() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryStore::new(),
            failures: AtomicUsize::new(2),
        });
        let pipeline = Pipeline::builder().store(store).build().unwrap();

        let result = pipeline.ingest(upload(0), b"x");

        assert!(matches!(
            result,
            Err(EngineError::Resolve(ResolveError::ConflictAfterRetry { .. }))
        ));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = EngineConfig::default().near_duplicate_threshold(0);
        assert!(Pipeline::builder().config(config).build().is_err());
    }

    #[test]
    fn cancellation_token_is_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
