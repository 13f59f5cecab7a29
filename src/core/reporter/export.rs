//! CSV export for duplicate and burst listings.

use super::{BurstGroupReport, DuplicatePair};
use std::io::Write;

/// Export duplicate pairs to CSV
///
/// CSV columns: Device, Duplicate ID, Duplicate Location, Canonical ID,
/// Canonical Location, Reason
pub fn export_duplicates_csv<W: Write>(pairs: &[DuplicatePair], mut writer: W) -> std::io::Result<()> {
    writeln!(
        writer,
        "Device,Duplicate ID,Duplicate Location,Canonical ID,Canonical Location,Reason"
    )?;

    for pair in pairs {
        writeln!(
            writer,
            "{},{},{},{},{},{}",
            escape_csv(pair.device.as_str()),
            pair.duplicate,
            escape_csv(&pair.duplicate_location),
            pair.canonical,
            escape_csv(pair.canonical_location.as_deref().unwrap_or("")),
            escape_csv(&pair.explanation)
        )?;
    }

    Ok(())
}

/// Export burst groups to CSV, one row per member
pub fn export_bursts_csv<W: Write>(groups: &[BurstGroupReport], mut writer: W) -> std::io::Result<()> {
    writeln!(writer, "Group ID,Device,Sequence,Record ID,Location,Captured At")?;

    for group in groups {
        for member in &group.members {
            writeln!(
                writer,
                "{},{},{},{},{},{}",
                group.group_id,
                escape_csv(group.device.as_str()),
                member.sequence,
                member.record,
                escape_csv(&member.location),
                member
                    .captured_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default()
            )?;
        }
    }

    Ok(())
}

/// Quote a field if it contains a separator, quote or newline
fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
