//! Error types for the watch session.

use std::path::PathBuf;
use thiserror::Error;
use windex_core::CoreError;
use windex_sink::SinkError;
use windex_store::StoreError;

pub type Result<T> = std::result::Result<T, WatchError>;

#[derive(Error, Debug)]
pub enum WatchError {
    /// A required external tool is absent and could not be installed.
    #[error("required tool '{tool}' is missing and could not be installed")]
    Dependency { tool: String },

    #[error("windex must run as root")]
    Privilege,

    /// The history could not be created at startup.
    #[error("failed to initialize history: {0}")]
    Init(#[source] StoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The event source failed while being read.
    #[error("event source failed: {0}")]
    Source(#[source] std::io::Error),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("watch backend error: {0}")]
    Notify(#[from] notify::Error),

    #[error("audit rule could not be registered for '{0}'")]
    Audit(PathBuf),

    #[error(transparent)]
    Config(#[from] CoreError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
