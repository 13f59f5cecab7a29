//! Raw media access for the hashing stage.

use crate::core::record::MediaRecord;
use crate::error::HashError;
use std::path::PathBuf;

/// Supplies the raw bytes behind a record's `location`
pub trait MediaSource: Send + Sync {
    fn read(&self, record: &MediaRecord) -> Result<Vec<u8>, HashError>;
}

/// Reads `location` as a filesystem path, optionally below a root
#[derive(Debug, Clone, Default)]
pub struct FsMediaSource {
    root: Option<PathBuf>,
}

impl FsMediaSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, location: &str) -> PathBuf {
        match self.root {
            Some(ref root) => root.join(location),
            None => PathBuf::from(location),
        }
    }
}

impl MediaSource for FsMediaSource {
    fn read(&self, record: &MediaRecord) -> Result<Vec<u8>, HashError> {
        let path = self.resolve(&record.location);
        std::fs::read(&path).map_err(|e| HashError::Io {
            location: path.display().to_string(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::{DeviceId, NewMediaRecord, RecordId};
    use chrono::Utc;
    use tempfile::TempDir;

    fn record(location: &str) -> MediaRecord {
        MediaRecord::from_new(
            RecordId(1),
            NewMediaRecord::new(DeviceId::new("c1"), location, Utc::now()),
        )
    }

    #[test]
    fn reads_relative_to_root() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("frame.jpg"), b"bytes").unwrap();

        let source = FsMediaSource::with_root(dir.path());

        assert_eq!(source.read(&record("frame.jpg")).unwrap(), b"bytes");
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let source = FsMediaSource::new();
        let result = source.read(&record("/definitely/not/here.jpg"));
        assert!(matches!(result, Err(HashError::Io { .. })));
    }
}
