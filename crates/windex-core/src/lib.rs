//! Windex Core - change events, classification and configuration
//!
//! This crate holds the pure parts of the auditor: turning watcher
//! output into typed events, deciding which events matter, and
//! resolving where everything lives on disk.
//!
//! # Example
//!
//! ```
//! use windex_core::{ChangeEvent, Classifier, Classification};
//!
//! let event = ChangeEvent::parse_line("'MODIFY, /data/project/notes.txt.swp'").unwrap();
//! let classifier = Classifier::default();
//! assert_eq!(classifier.classify(&event), Classification::Ignored);
//! ```

pub mod classify;
pub mod config;
pub mod error;
pub mod event;

pub use classify::{Classification, Classifier, ClassifierConfig};
pub use config::{store_identity, ConfigOptions, WatchConfig};
pub use error::{CoreError, Result};
pub use event::{ChangeEvent, EventKind};
