//! Windex Sink - debounced audit logging
//!
//! A filesystem under attack (or under a busy editor) produces the same
//! message over and over. The sink coalesces identical (message, level)
//! pairs seen within a short window into a single line with a count:
//!
//! ```text
//! [2026-10-18 14:02:11] [INFO] File /data/a.txt was accessed | [12]
//! ```
//!
//! Entries are flushed by a single-shot timer that is rearmed on every
//! call, or all at once by [`DebouncedSink::flush_all`] on shutdown.

mod error;
mod output;
mod sink;

pub use error::{Result, SinkError};
pub use output::{Capture, Console, LogFile, SinkOutput};
pub use sink::{DebouncedSink, Level};
