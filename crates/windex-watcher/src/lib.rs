//! Windex Watcher - event sources, host collaborators and the watch session
//!
//! This crate handles everything that touches the running host:
//! - Reading change events from `inotifywait`, `notify` or any reader
//! - Installing missing tools and restarting services
//! - Registering the audit rule
//! - Driving the session from startup to shutdown

pub mod audit;
mod error;
pub mod platform;
mod session;
mod source;

pub use error::{Result, WatchError};
pub use platform::{is_privileged, CommandRunner, Platform, SystemRunner};
pub use session::{Disposition, LoopExit, Phase, SessionOptions, Sinks, WatchSession};
pub use source::{inotify_args, EventBackend, EventSource, INOTIFY_PROGRAM};
