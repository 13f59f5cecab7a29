//! Average Hash (aHash) implementation.
//!
//! aHash works by:
//! 1. Converting the image to single-channel luminance
//! 2. Downsampling to grid_size x grid_size
//! 3. Computing the mean intensity of the grid
//! 4. For each cell: bit = 1 if the cell is at or above the mean, else 0
//!
//! Bits are packed row-major, most significant bit first. The default
//! 8x8 grid gives a 64-bit digest.

use super::traits::{PerceptualAlgorithm, PerceptualDigest};
use crate::error::HashError;
use image::imageops::{self, FilterType};
use image::DynamicImage;

/// Default grid edge length
pub const DEFAULT_GRID_SIZE: u32 = 8;

/// Average Hash (aHash) implementation
pub struct AverageHasher {
    grid_size: u32,
}

impl AverageHasher {
    pub fn new(grid_size: u32) -> Self {
        Self {
            grid_size: grid_size.max(1),
        }
    }
}

impl Default for AverageHasher {
    fn default() -> Self {
        Self::new(DEFAULT_GRID_SIZE)
    }
}

impl PerceptualAlgorithm for AverageHasher {
    fn hash_image(&self, image: &DynamicImage) -> Result<PerceptualDigest, HashError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(HashError::EmptyImage {
                width: image.width(),
                height: image.height(),
            });
        }

        let gray = image.to_luma8();
        let grid = imageops::resize(&gray, self.grid_size, self.grid_size, FilterType::Triangle);

        let total: u64 = grid.pixels().map(|p| p[0] as u64).sum();
        let count = (self.grid_size * self.grid_size) as u64;

        let cells = (self.grid_size * self.grid_size) as usize;
        let mut hash_bytes = Vec::with_capacity(cells.div_ceil(8));
        let mut current_byte: u8 = 0;
        let mut bit_position = 0;

        for pixel in grid.pixels() {
            // pixel >= total / count, kept in integers
            if pixel[0] as u64 * count >= total {
                current_byte |= 1 << (7 - bit_position);
            }

            bit_position += 1;

            if bit_position == 8 {
                hash_bytes.push(current_byte);
                current_byte = 0;
                bit_position = 0;
            }
        }

        if bit_position > 0 {
            hash_bytes.push(current_byte);
        }

        Ok(PerceptualDigest::new(hash_bytes))
    }

    fn name(&self) -> &'static str {
        "aHash"
    }
}

#[cfg(test)]
mod tests {
    use super::super::traits::PerceptualHash;
    use super::*;
    use image::{ImageBuffer, Luma, Rgb};

    fn quadrants() -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_fn(80, 80, |x, y| {
            if (x < 40) == (y < 40) {
                Rgb([240, 240, 240])
            } else {
                Rgb([10, 10, 10])
            }
        }))
    }

    fn left_bright() -> DynamicImage {
        DynamicImage::ImageLuma8(ImageBuffer::from_fn(64, 64, |x, _| {
            if x < 32 {
                Luma([230u8])
            } else {
                Luma([20u8])
            }
        }))
    }

    #[test]
    fn produces_64_bit_digest() {
        let hash = AverageHasher::default().hash_image(&left_bright()).unwrap();
        assert_eq!(hash.bit_count(), 64);
    }

    #[test]
    fn identical_images_produce_identical_hash() {
        let hasher = AverageHasher::default();
        let hash1 = hasher.hash_image(&left_bright()).unwrap();
        let hash2 = hasher.hash_image(&left_bright()).unwrap();
        assert_eq!(hash1.distance(&hash2), 0);
    }

    #[test]
    fn half_bright_image_has_split_rows() {
        let hash = AverageHasher::default().hash_image(&left_bright()).unwrap();
        assert!(hash.as_bytes().iter().all(|&b| b == 0b1111_0000));
    }

    #[test]
    fn brightness_shift_keeps_structure() {
        let hasher = AverageHasher::default();
        let original = left_bright();
        let brighter = DynamicImage::ImageLuma8(ImageBuffer::from_fn(64, 64, |x, _| {
            if x < 32 {
                Luma([250u8])
            } else {
                Luma([45u8])
            }
        }));

        let a = hasher.hash_image(&original).unwrap();
        let b = hasher.hash_image(&brighter).unwrap();
        assert_eq!(a.distance(&b), 0);
    }

    #[test]
    fn different_structure_is_far_apart() {
        let hasher = AverageHasher::default();
        let a = hasher.hash_image(&left_bright()).unwrap();
        let b = hasher.hash_image(&quadrants()).unwrap();
        assert!(a.distance(&b) >= 16);
    }

    #[test]
    fn empty_image_is_rejected() {
        let empty = DynamicImage::ImageLuma8(ImageBuffer::new(0, 0));
        assert!(AverageHasher::default().hash_image(&empty).is_err());
    }
}
