//! SQLite record store for persistent storage.

use super::{RecordStore, StoreStats};
use crate::core::hasher::{ContentDigest, PerceptualDigest};
use crate::core::record::{
    BurstGroupId, DeviceId, DuplicateMatch, MediaRecord, NewMediaRecord, RecordFilter, RecordId,
};
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const COLUMNS: &str = "id, device_id, location, upload_ts, capture_ts, content_hash,
     perceptual_hash, is_duplicate, duplicate_of, duplicate_match, burst_group,
     burst_sequence, resolved, not_duplicate_override, revision";

/// SQLite-backed record store
///
/// Uses WAL (Write-Ahead Logging) mode so readers proceed while a
/// commit is in flight. Each `commit` runs in a single transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open or create a record database at the given path
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::OpenFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        }

        let conn = Connection::open(path).map_err(|e| StoreError::OpenFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        })
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::OpenFailed {
            path: PathBuf::from(":memory:"),
            reason: e.to_string(),
        })?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS media_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                device_id TEXT NOT NULL,
                location TEXT NOT NULL,
                upload_ts INTEGER NOT NULL,
                capture_ts INTEGER,
                content_hash TEXT,
                perceptual_hash TEXT,
                is_duplicate INTEGER NOT NULL DEFAULT 0,
                duplicate_of INTEGER,
                duplicate_match TEXT,
                burst_group TEXT,
                burst_sequence INTEGER,
                resolved INTEGER NOT NULL DEFAULT 0,
                not_duplicate_override INTEGER NOT NULL DEFAULT 0,
                revision INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_device_upload ON media_records(device_id, upload_ts);
            CREATE INDEX IF NOT EXISTS idx_device_capture ON media_records(device_id, capture_ts);
            CREATE INDEX IF NOT EXISTS idx_content_hash ON media_records(content_hash);",
        )
        .map_err(|e| StoreError::QueryFailed(e.to_string()))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn to_millis(time: DateTime<Utc>) -> i64 {
        time.timestamp_millis()
    }

    fn from_millis(index: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                index,
                Type::Integer,
                format!("timestamp out of range: {}", millis).into(),
            )
        })
    }

    fn match_to_string(m: DuplicateMatch) -> String {
        match m {
            DuplicateMatch::Exact => "exact".to_string(),
            DuplicateMatch::Near { distance } => format!("near:{}", distance),
        }
    }

    fn string_to_match(s: &str) -> Option<DuplicateMatch> {
        match s.split_once(':') {
            Some(("near", distance)) => distance
                .parse()
                .ok()
                .map(|distance| DuplicateMatch::Near { distance }),
            _ if s == "exact" => Some(DuplicateMatch::Exact),
            _ => None,
        }
    }

    fn row_to_record(row: &Row<'_>) -> rusqlite::Result<MediaRecord> {
        let conversion = |index: usize, e: crate::error::HashError| {
            rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e))
        };

        let content_hash = row
            .get::<_, Option<String>>(5)?
            .map(ContentDigest::from_hex)
            .transpose()
            .map_err(|e| conversion(5, e))?;
        let perceptual_hash = row
            .get::<_, Option<String>>(6)?
            .map(|hex| PerceptualDigest::from_hex(&hex))
            .transpose()
            .map_err(|e| conversion(6, e))?;
        let capture_timestamp = row
            .get::<_, Option<i64>>(4)?
            .map(|ms| Self::from_millis(4, ms))
            .transpose()?;

        Ok(MediaRecord {
            id: RecordId(row.get(0)?),
            device_id: DeviceId(row.get(1)?),
            location: row.get(2)?,
            upload_timestamp: Self::from_millis(3, row.get(3)?)?,
            capture_timestamp,
            content_hash,
            perceptual_hash,
            is_duplicate: row.get(7)?,
            duplicate_of: row.get::<_, Option<i64>>(8)?.map(RecordId),
            duplicate_match: row
                .get::<_, Option<String>>(9)?
                .and_then(|s| Self::string_to_match(&s)),
            burst_group_id: row.get::<_, Option<String>>(10)?.map(BurstGroupId),
            burst_sequence: row.get::<_, Option<i64>>(11)?.map(|s| s as u32),
            resolved: row.get(12)?,
            not_duplicate_override: row.get(13)?,
            revision: row.get::<_, i64>(14)? as u64,
        })
    }

    fn query_records(
        conn: &Connection,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<MediaRecord>, StoreError> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        let records = stmt
            .query_map(params, Self::row_to_record)
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        Ok(records)
    }

    /// WHERE clause and bound values for a filter
    fn filter_clause(filter: &RecordFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut clauses = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref device) = filter.device {
            clauses.push("device_id = ?");
            values.push(Box::new(device.0.clone()));
        }
        if let Some(from) = filter.uploaded_from {
            clauses.push("upload_ts >= ?");
            values.push(Box::new(Self::to_millis(from)));
        }
        if let Some(to) = filter.uploaded_to {
            clauses.push("upload_ts <= ?");
            values.push(Box::new(Self::to_millis(to)));
        }

        let clause = if clauses.is_empty() {
            "1 = 1".to_string()
        } else {
            clauses.join(" AND ")
        };
        (clause, values)
    }
}

impl RecordStore for SqliteStore {
    fn insert(&self, record: NewMediaRecord) -> Result<MediaRecord, StoreError> {
        let conn = self.lock()?;

        conn.execute(
            "INSERT INTO media_records (device_id, location, upload_ts, capture_ts)
             VALUES (?, ?, ?, ?)",
            params![
                record.device_id.0,
                record.location,
                Self::to_millis(record.upload_timestamp),
                record.capture_timestamp.map(Self::to_millis),
            ],
        )
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        let id = RecordId(conn.last_insert_rowid());
        Ok(MediaRecord::from_new(id, record))
    }

    fn get(&self, id: RecordId) -> Result<Option<MediaRecord>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM media_records WHERE id = ?", COLUMNS),
            [id.0],
            Self::row_to_record,
        )
        .optional()
        .map_err(|e| StoreError::QueryFailed(e.to_string()))
    }

    fn device_records(&self, device: &DeviceId) -> Result<Vec<MediaRecord>, StoreError> {
        let conn = self.lock()?;
        Self::query_records(
            &conn,
            &format!(
                "SELECT {} FROM media_records WHERE device_id = ? ORDER BY upload_ts, id",
                COLUMNS
            ),
            &[&device.0],
        )
    }

    fn select(&self, filter: &RecordFilter) -> Result<Vec<MediaRecord>, StoreError> {
        let conn = self.lock()?;
        let (clause, values) = Self::filter_clause(filter);
        let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        Self::query_records(
            &conn,
            &format!(
                "SELECT {} FROM media_records WHERE {} ORDER BY upload_ts, id",
                COLUMNS, clause
            ),
            &params,
        )
    }

    fn commit(&self, changes: &[MediaRecord]) -> Result<Vec<MediaRecord>, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        for change in changes {
            let found: Option<i64> = tx
                .query_row(
                    "SELECT revision FROM media_records WHERE id = ?",
                    [change.id.0],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

            let found = found.ok_or(StoreError::NotFound { id: change.id.0 })? as u64;
            if found != change.revision {
                // Dropping the transaction rolls it back
                return Err(StoreError::Conflict {
                    id: change.id.0,
                    expected: change.revision,
                    found,
                });
            }

            tx.execute(
                "UPDATE media_records SET
                    content_hash = COALESCE(content_hash, ?),
                    perceptual_hash = ?,
                    capture_ts = ?,
                    is_duplicate = ?,
                    duplicate_of = ?,
                    duplicate_match = ?,
                    burst_group = ?,
                    burst_sequence = ?,
                    resolved = ?,
                    not_duplicate_override = ?,
                    revision = revision + 1
                 WHERE id = ?",
                params![
                    change.content_hash.as_ref().map(|h| h.as_str().to_string()),
                    change.perceptual_hash.as_ref().map(|h| h.to_string()),
                    change.capture_timestamp.map(Self::to_millis),
                    change.is_duplicate,
                    change.duplicate_of.map(|id| id.0),
                    change.duplicate_match.map(Self::match_to_string),
                    change.burst_group_id.as_ref().map(|g| g.0.clone()),
                    change.burst_sequence.map(|s| s as i64),
                    change.resolved,
                    change.not_duplicate_override,
                    change.id.0,
                ],
            )
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        }

        let mut committed = Vec::with_capacity(changes.len());
        for change in changes {
            let record = tx
                .query_row(
                    &format!("SELECT {} FROM media_records WHERE id = ?", COLUMNS),
                    [change.id.0],
                    Self::row_to_record,
                )
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
            committed.push(record);
        }

        tx.commit()
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        Ok(committed)
    }

    fn reset(&self, filter: &RecordFilter) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let (clause, values) = Self::filter_clause(filter);
        let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();

        conn.execute(
            &format!(
                "UPDATE media_records SET
                    is_duplicate = 0,
                    duplicate_of = NULL,
                    duplicate_match = NULL,
                    burst_group = NULL,
                    burst_sequence = NULL,
                    resolved = 0,
                    revision = revision + 1
                 WHERE {}",
                clause
            ),
            params.as_slice(),
        )
        .map_err(|e| StoreError::QueryFailed(e.to_string()))
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.lock()?;
        let records = Self::query_records(
            &conn,
            &format!("SELECT {} FROM media_records", COLUMNS),
            &[],
        )?;
        Ok(StoreStats::from_records(records.iter()))
    }
}
