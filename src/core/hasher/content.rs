//! Content hashing for exact-duplicate detection.
//!
//! SHA-256 over the raw bytes, rendered as 64 lowercase hex digits.

use crate::error::HashError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Hex SHA-256 digest of a media payload
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Wrap an existing hex digest (e.g. read back from storage)
    pub fn from_hex(value: impl Into<String>) -> Result<Self, HashError> {
        let value = value.into();
        if value.len() != 64 || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(HashError::InvalidDigest {
                value,
                reason: "expected 64 hex digits".to_string(),
            });
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Computes content digests
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHasher;

impl ContentHasher {
    pub fn new() -> Self {
        Self
    }

    /// Hash an in-memory payload
    pub fn compute_content_hash(&self, bytes: &[u8]) -> ContentDigest {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        ContentDigest(format!("{:x}", hasher.finalize()))
    }
}

impl From<ContentDigest> for String {
    fn from(digest: ContentDigest) -> Self {
        digest.0
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = HashError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(value)
    }
}
