//! Error types for the revision store.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The directory the history tracks is gone.
    #[error("watched directory does not exist: '{0}'")]
    MissingWorkTree(PathBuf),

    /// Something already claims to be the history for this directory.
    #[error("a history already exists at '{0}'")]
    AlreadyInitialized(PathBuf),

    /// An operation needed the history but it has not been created.
    #[error("no history found at '{0}'")]
    NotInitialized(PathBuf),

    /// The file to record no longer exists, so it cannot be staged.
    #[error("file does not exist: '{0}'")]
    PathMissing(PathBuf),

    /// The revision backend reported a failure.
    #[error("{step} failed: {detail}")]
    Backend { step: &'static str, detail: String },

    #[error("filesystem error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn backend(step: &'static str, detail: impl Into<String>) -> Self {
        Self::Backend {
            step,
            detail: detail.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
