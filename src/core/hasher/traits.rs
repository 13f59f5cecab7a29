//! Trait definitions for perceptual hashing.

use super::decode::FastDecoder;
use crate::error::HashError;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A computed perceptual hash that can be compared
pub trait PerceptualHash: Clone + Send + Sync {
    /// Compute the Hamming distance to another hash
    ///
    /// Returns the number of bits that differ between the two hashes.
    /// Lower distance = more similar images.
    fn distance(&self, other: &Self) -> u32;

    /// Get the raw hash bytes
    fn as_bytes(&self) -> &[u8];

    /// Get the hash as a hexadecimal string
    fn to_hex(&self) -> String {
        self.as_bytes()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    /// Get the total number of bits in this hash
    fn bit_count(&self) -> u32 {
        (self.as_bytes().len() * 8) as u32
    }
}

/// Trait for perceptual hash algorithm implementations
///
/// Passed to the pipeline as a trait object so tests can swap in
/// deterministic doubles.
pub trait PerceptualAlgorithm: Send + Sync {
    /// Compute a hash from an already-decoded image
    fn hash_image(&self, image: &DynamicImage) -> Result<PerceptualDigest, HashError>;

    /// Decode an in-memory payload and hash it
    fn hash_bytes(&self, bytes: &[u8]) -> Result<PerceptualDigest, HashError> {
        let image = FastDecoder::decode(bytes)?;
        self.hash_image(&image)
    }

    /// Short algorithm name for logs and reports
    fn name(&self) -> &'static str;
}

/// Fixed-width perceptual digest, stored as hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PerceptualDigest {
    bytes: Vec<u8>,
}

impl PerceptualDigest {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Build a 64-bit digest from an integer (bit 63 is the first grid cell)
    pub fn from_u64(bits: u64) -> Self {
        Self {
            bytes: bits.to_be_bytes().to_vec(),
        }
    }

    /// Parse a digest from its hex form
    pub fn from_hex(value: &str) -> Result<Self, HashError> {
        if value.is_empty()
            || value.len() % 2 != 0
            || !value.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(HashError::InvalidDigest {
                value: value.to_string(),
                reason: "expected an even, non-zero number of ASCII hex digits".to_string(),
            });
        }

        let bytes = (0..value.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&value[i..i + 2], 16))
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|e| HashError::InvalidDigest {
                value: value.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self { bytes })
    }
}

impl PerceptualHash for PerceptualDigest {
    fn distance(&self, other: &Self) -> u32 {
        let shared: u32 = self
            .bytes
            .iter()
            .zip(other.bytes.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum();
        // Bits present in only one digest count as differing
        let unmatched = self.bytes.len().abs_diff(other.bytes.len()) as u32 * 8;
        shared + unmatched
    }

    fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Display for PerceptualDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<PerceptualDigest> for String {
    fn from(digest: PerceptualDigest) -> Self {
        digest.to_hex()
    }
}

impl TryFrom<String> for PerceptualDigest {
    type Error = HashError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}
