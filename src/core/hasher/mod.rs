//! # Hasher Module
//!
//! Fingerprints media payloads for duplicate detection.
//!
//! ## Fingerprints
//! - **Content hash** - SHA-256 of the raw bytes, for byte-identical copies
//! - **Perceptual hash** - 64-bit average hash of the decoded pixels,
//!   tolerant to re-encoding and minor edits
//!
//! ## How It Works
//! 1. Convert to grayscale
//! 2. Resize to an 8x8 grid
//! 3. Set one bit per cell at or above the grid mean
//! 4. Compare hashes using Hamming distance
//!
//! ## Example
//! ```rust,ignore
//! use trailcam_dedup::core::hasher::{ContentHasher, PerceptualHasher};
//!
//! let content = ContentHasher::new().compute_content_hash(&bytes);
//! let perceptual = PerceptualHasher::default().hash_payload(&bytes);
//! ```

mod average;
mod content;
pub mod decode;
mod traits;

pub use average::{AverageHasher, DEFAULT_GRID_SIZE};
pub use content::{ContentDigest, ContentHasher};
pub use decode::{FastDecoder, PayloadKind};
pub use traits::{PerceptualAlgorithm, PerceptualDigest, PerceptualHash};

use image::DynamicImage;
use tracing::warn;

/// Perceptual hashing stage.
///
/// Wraps an injectable algorithm and turns failures into "no digest",
/// which callers treat as "near-duplicate check not possible".
pub struct PerceptualHasher {
    algorithm: Box<dyn PerceptualAlgorithm>,
}

impl PerceptualHasher {
    pub fn new(algorithm: Box<dyn PerceptualAlgorithm>) -> Self {
        Self { algorithm }
    }

    /// Hash a decoded image
    pub fn compute_perceptual_hash(&self, image: &DynamicImage) -> Option<PerceptualDigest> {
        match self.algorithm.hash_image(image) {
            Ok(digest) => Some(digest),
            Err(e) => {
                warn!(algorithm = self.algorithm.name(), error = %e, "perceptual hash failed");
                None
            }
        }
    }

    /// Decode and hash a raw payload; non-image payloads yield `None`
    pub fn hash_payload(&self, bytes: &[u8]) -> Option<PerceptualDigest> {
        if !PayloadKind::sniff(bytes).is_image() {
            return None;
        }

        match self.algorithm.hash_bytes(bytes) {
            Ok(digest) => Some(digest),
            Err(e) => {
                warn!(algorithm = self.algorithm.name(), error = %e, "image decode failed; near-duplicate check skipped");
                None
            }
        }
    }

    pub fn algorithm_name(&self) -> &'static str {
        self.algorithm.name()
    }
}

impl Default for PerceptualHasher {
    fn default() -> Self {
        Self::new(Box::new(AverageHasher::default()))
    }
}

/// Both hashing stages, constructed once and shared by the pipeline
pub struct Hashers {
    pub content: ContentHasher,
    pub perceptual: PerceptualHasher,
}

impl Hashers {
    pub fn new(perceptual: PerceptualHasher) -> Self {
        Self {
            content: ContentHasher::new(),
            perceptual,
        }
    }
}

impl Default for Hashers {
    fn default() -> Self {
        Self::new(PerceptualHasher::default())
    }
}
