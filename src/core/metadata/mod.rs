//! # Metadata Module
//!
//! Extracts capture metadata from raw media payloads.
//!
//! ## Extracted Fields
//! - Capture time (DateTimeOriginal, falling back to DateTime)
//! - Camera make and model
//!
//! Field cameras stamp local time without an offset; it is taken as UTC.
//! Payloads without EXIF (PNG, video, corrupt files) simply yield nothing.

use chrono::{DateTime, NaiveDateTime, Utc};
use exif::{In, Reader, Tag, Value};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// EXIF date format: "YYYY:MM:DD HH:MM:SS"
const EXIF_DATETIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Metadata relevant to capture resolution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    pub captured_at: Option<DateTime<Utc>>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
}

impl CaptureMetadata {
    /// Read EXIF from a payload held in memory
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut metadata = CaptureMetadata::default();

        let exif = match Reader::new().read_from_container(&mut Cursor::new(bytes)) {
            Ok(exif) => exif,
            Err(_) => return metadata,
        };

        metadata.captured_at = [Tag::DateTimeOriginal, Tag::DateTime]
            .iter()
            .filter_map(|tag| exif.get_field(*tag, In::PRIMARY))
            .find_map(|field| get_string_value(&field.value))
            .and_then(|s| parse_exif_datetime(&s));

        if let Some(field) = exif.get_field(Tag::Make, In::PRIMARY) {
            metadata.camera_make = get_string_value(&field.value);
        }
        if let Some(field) = exif.get_field(Tag::Model, In::PRIMARY) {
            metadata.camera_model = get_string_value(&field.value);
        }

        metadata
    }
}

/// Capture time of a payload, if its metadata carries one
pub fn extract_capture_time(bytes: &[u8]) -> Option<DateTime<Utc>> {
    CaptureMetadata::from_bytes(bytes).captured_at
}

fn parse_exif_datetime(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s.trim(), EXIF_DATETIME_FORMAT)
        .ok()
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
}

/// Helper to extract string from EXIF ASCII value
fn get_string_value(value: &Value) -> Option<String> {
    if let Value::Ascii(ref vec) = value {
        if let Some(bytes) = vec.first() {
            if let Ok(s) = std::str::from_utf8(bytes) {
                let trimmed = s.trim_end_matches('\0').trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use image::{ImageBuffer, Rgb};

    #[test]
    fn parses_exif_datetime_as_utc() {
        assert_eq!(
            parse_exif_datetime("2024:05:01 10:00:02"),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 2).unwrap())
        );
    }

    #[test]
    fn rejects_malformed_datetime() {
        assert_eq!(parse_exif_datetime("0000:00:00 00:00:00"), None);
        assert_eq!(parse_exif_datetime("yesterday"), None);
    }

    #[test]
    fn ascii_values_are_trimmed() {
        let value = Value::Ascii(vec![b"Browning  \0".to_vec()]);
        assert_eq!(get_string_value(&value), Some("Browning".to_string()));
    }

    #[test]
    fn payload_without_exif_has_no_capture_time() {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(4, 4, Rgb([9, 9, 9]));
        let mut png = Vec::new();
        img.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        assert_eq!(extract_capture_time(&png), None);
        assert_eq!(CaptureMetadata::from_bytes(b"not media"), CaptureMetadata::default());
    }
}
