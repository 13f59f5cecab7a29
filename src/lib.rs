//! # Trail Camera Dedup
//!
//! Decides, for every capture uploaded by a fixed field camera, whether it
//! duplicates earlier content and whether it belongs to a rapid-fire burst.
//!
//! ## Core Philosophy
//! - **Never lose a decision** - every record commits atomically
//! - **Respect people** - a manual "not a duplicate" is final
//! - **Re-runnable** - reprocessing the same corpus changes nothing
//!
//! ## Architecture
//! - `core` - The resolution engine
//! - `events` - Event-driven progress reporting
//! - `error` - Error types

pub mod core;
pub mod error;
pub mod events;

// Re-export commonly used types at the crate root
pub use error::{EngineError, Result};

/// Initialize tracing for the library
///
/// This should be called by the application entry point. `RUST_LOG`
/// controls verbosity; a second call is a no-op.
pub fn init_tracing() {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
