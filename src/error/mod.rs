//! # Error Module
//!
//! Error types for the capture deduplication engine.
//!
//! ## Design Principles
//! - **Never panic** on user data - return errors instead
//! - **Include context** - record ids, devices, locations
//! - **Isolate failures** - a failing record never aborts a batch

use std::path::PathBuf;
use thiserror::Error;

/// Top-level engine error
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Hashing error: {0}")]
    Hash(#[from] HashError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Resolution error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Override rejected: {0}")]
    Override(#[from] OverrideError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Report generation error: {0}")]
    Report(#[from] ReportError),
}

/// Errors that occur while reading or hashing media content
#[derive(Error, Debug)]
pub enum HashError {
    #[error("Failed to read media at {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode image: {reason}")]
    Decode { reason: String },

    #[error("Image is empty: {width}x{height}")]
    EmptyImage { width: u32, height: u32 },

    #[error("Invalid digest '{value}': {reason}")]
    InvalidDigest { value: String, reason: String },
}

/// Errors raised by record stores
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open record database at {path}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    #[error("Database query failed: {0}")]
    QueryFailed(String),

    #[error("Record {id} not found")]
    NotFound { id: i64 },

    #[error("Record {id} was modified concurrently (expected revision {expected}, found {found})")]
    Conflict { id: i64, expected: u64, found: u64 },

    #[error("Record store lock poisoned")]
    Poisoned,
}

/// Errors that occur while resolving a single record
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Record {id} still conflicted after retry")]
    ConflictAfterRetry { id: i64 },

    #[error("Record {id} failed: {source}")]
    Record {
        id: i64,
        #[source]
        source: StoreError,
    },

    #[error("Device lock poisoned for {device}")]
    LockPoisoned { device: String },
}

/// Validation failures of the manual "not a duplicate" override
#[derive(Error, Debug)]
pub enum OverrideError {
    #[error("Record {id} not found")]
    NotFound { id: i64 },

    #[error("Record {id} is not flagged as a duplicate; nothing to override")]
    NotFlagged { id: i64 },

    #[error("Failed to apply override: {0}")]
    Store(#[from] StoreError),
}

/// Invalid engine configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid threshold: {value} (must be 1-64)")]
    InvalidThreshold { value: u32 },

    #[error("Invalid {name}: must be greater than zero")]
    ZeroValue { name: &'static str },

    #[error("Failed to read config file {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },
}

/// Errors while producing listings and exports
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write export to {path}: {source}")]
    Export {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize report: {0}")]
    Serialize(String),
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, EngineError>;
