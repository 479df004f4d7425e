//! The revision backend: the external tool that actually keeps history.
//!
//! The store never touches history objects itself. It asks a backend to
//! init, stage, commit and mirror, and interprets the results.

use crate::error::{Result, StoreError};
use std::ffi::OsStr;
use std::path::Path;
use std::process::{Command, Output};
use tracing::debug;

/// Name and email recorded on every commit.
pub const COMMITTER_NAME: &str = "watchdir";
pub const COMMITTER_EMAIL: &str = "admin@admin.com";

/// Result of a successful commit call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A new revision was written.
    Committed,
    /// Content matched the last revision; nothing was written.
    NothingToCommit,
}

/// Operations a versioned history must support.
pub trait RevisionBackend: Send + Sync {
    /// Creates a history for `work_tree` whose metadata lives in `git_dir`,
    /// with a fixed committer identity and `work_tree` marked as trusted.
    fn init(&self, work_tree: &Path, git_dir: &Path) -> Result<()>;

    /// Stages exactly `path`.
    fn stage(&self, work_tree: &Path, path: &Path) -> Result<()>;

    /// Commits whatever is staged.
    fn commit(&self, work_tree: &Path, message: &str) -> Result<CommitOutcome>;

    /// Writes a full mirror of the history at `source` into `destination`.
    fn mirror(&self, source: &Path, destination: &Path) -> Result<()>;

    /// True if `work_tree` is a working tree the backend recognizes.
    fn status(&self, work_tree: &Path) -> bool;
}

/// Backend driving the `git` command-line tool.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            program: "git".to_string(),
        }
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a specific git executable.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, step: &'static str, args: &[&OsStr]) -> Result<Output> {
        debug!("{} {:?}", self.program, args);
        Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| StoreError::backend(step, format!("cannot run {}: {}", self.program, e)))
    }

    fn run_checked(&self, step: &'static str, args: &[&OsStr]) -> Result<Output> {
        let output = self.run(step, args)?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(StoreError::backend(step, describe_failure(&output)))
        }
    }
}

fn describe_failure(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let text = if stderr.trim().is_empty() {
        stdout.trim().to_string()
    } else {
        stderr.trim().to_string()
    };
    format!("{} ({})", text, output.status)
}

/// True if git's output says the commit had nothing new in it.
pub(crate) fn is_nothing_to_commit(text: &str) -> bool {
    text.contains("nothing to commit")
        || text.contains("nothing added to commit")
        || text.contains("no changes added to commit")
}

impl RevisionBackend for GitCli {
    fn init(&self, work_tree: &Path, git_dir: &Path) -> Result<()> {
        self.run_checked(
            "git init",
            &[
                OsStr::new("init"),
                OsStr::new("--separate-git-dir"),
                git_dir.as_os_str(),
                work_tree.as_os_str(),
            ],
        )?;

        // Identity is repo-local; only safe.directory must be global for git
        // to honor it.
        let git_dir_arg = format!("--git-dir={}", git_dir.display());
        for (key, value) in [("user.name", COMMITTER_NAME), ("user.email", COMMITTER_EMAIL)] {
            self.run_checked(
                "git config",
                &[OsStr::new(&git_dir_arg), OsStr::new("config"), OsStr::new(key), OsStr::new(value)],
            )?;
        }

        self.run_checked(
            "git config safe.directory",
            &[
                OsStr::new("config"),
                OsStr::new("--global"),
                OsStr::new("--add"),
                OsStr::new("safe.directory"),
                work_tree.as_os_str(),
            ],
        )?;

        self.run_checked(
            "git branch",
            &[
                OsStr::new("-C"),
                work_tree.as_os_str(),
                OsStr::new("symbolic-ref"),
                OsStr::new("HEAD"),
                OsStr::new("refs/heads/main"),
            ],
        )?;

        Ok(())
    }

    fn stage(&self, work_tree: &Path, path: &Path) -> Result<()> {
        self.run_checked(
            "git add",
            &[
                OsStr::new("-C"),
                work_tree.as_os_str(),
                OsStr::new("add"),
                OsStr::new("--"),
                path.as_os_str(),
            ],
        )?;
        Ok(())
    }

    fn commit(&self, work_tree: &Path, message: &str) -> Result<CommitOutcome> {
        let output = self.run(
            "git commit",
            &[
                OsStr::new("-C"),
                work_tree.as_os_str(),
                OsStr::new("commit"),
                OsStr::new("-m"),
                OsStr::new(message),
            ],
        )?;

        if output.status.success() {
            return Ok(CommitOutcome::Committed);
        }

        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        if is_nothing_to_commit(&combined) {
            Ok(CommitOutcome::NothingToCommit)
        } else {
            Err(StoreError::backend("git commit", describe_failure(&output)))
        }
    }

    fn mirror(&self, source: &Path, destination: &Path) -> Result<()> {
        self.run_checked(
            "git clone --mirror",
            &[
                OsStr::new("clone"),
                OsStr::new("--quiet"),
                OsStr::new("--mirror"),
                source.as_os_str(),
                destination.as_os_str(),
            ],
        )?;
        Ok(())
    }

    fn status(&self, work_tree: &Path) -> bool {
        self.run(
            "git status",
            &[OsStr::new("-C"), work_tree.as_os_str(), OsStr::new("status")],
        )
        .map(|output| output.status.success())
        .unwrap_or(false)
    }
}
