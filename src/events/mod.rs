//! # Events Module
//!
//! Progress reporting for batch runs.
//!
//! ## Design
//! The engine emits events through channels, so the CLI (or any other
//! front end) can subscribe and display progress.
//!
//! ## Example
//! ```rust,ignore
//! let (sender, receiver) = EventChannel::new();
//!
//! std::thread::spawn(move || {
//!     for event in receiver.iter() {
//!         if let Event::Batch(BatchEvent::Progress(p)) = event {
//!             println!("Processed {}/{}", p.processed, p.total);
//!         }
//!     }
//! });
//!
//! coordinator.run_with_events(&options, &sender, &CancellationToken::new())?;
//! ```

mod channel;
mod types;

pub use channel::{null_sender, EventChannel, EventReceiver, EventSender};
pub use types::*;
