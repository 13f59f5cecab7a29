//! # trailcam-dedup CLI
//!
//! Command-line interface for the capture resolution engine.
//!
//! ## Usage
//! ```bash
//! trailcam-dedup ingest --device cam-01 DCIM/*.JPG
//! trailcam-dedup process --device cam-01 --dry-run
//! trailcam-dedup duplicates --output json
//! ```

mod cli;

use trailcam_dedup::Result;

fn main() -> Result<()> {
    cli::run()
}
