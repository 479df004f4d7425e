//! Error types for the core crate.
//!
//! Every variant carries enough context (the offending line or path)
//! to produce one useful log line without further lookups.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience type for fallible core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Things that can go wrong while parsing events or resolving configuration.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A watcher line did not have the `'<kind>, <path>'` shape.
    #[error("malformed event line '{line}': {reason}")]
    Protocol { line: String, reason: String },

    /// The directory to watch does not exist.
    #[error("directory does not exist: '{0}'")]
    MissingWatchDir(PathBuf),

    /// The path exists but is a file, socket, etc.
    #[error("not a directory: '{0}'")]
    NotADirectory(PathBuf),

    /// A filesystem call failed while resolving a path.
    #[error("failed to resolve '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `~` was used but the home directory could not be determined.
    #[error("cannot expand '~': home directory is unknown")]
    MissingHome,
}

impl CoreError {
    /// Creates a protocol error for a raw watcher line.
    pub fn protocol(line: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Protocol {
            line: line.into(),
            reason: reason.into(),
        }
    }

    /// Creates an IO error with the path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
