//! An in-process backend for tests.
//!
//! Writes just enough to disk for [`RevisionStore`](crate::RevisionStore)
//! to see a present history, and records every call.

use crate::backend::{CommitOutcome, RevisionBackend};
use crate::error::{Result, StoreError};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Init { work_tree: PathBuf, git_dir: PathBuf },
    Stage(PathBuf),
    Commit(String),
    Mirror { source: PathBuf, destination: PathBuf },
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<Call>,
    fail_next: HashSet<&'static str>,
    nothing_to_commit: bool,
}

/// Recording backend. Clones share state.
#[derive(Debug, Default, Clone)]
pub struct FakeBackend {
    state: Arc<Mutex<State>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Makes the next call of `step` fail. Steps are `init`, `stage`,
    /// `commit` and `mirror`.
    pub fn fail_next(&self, step: &'static str) {
        self.state.lock().fail_next.insert(step);
    }

    /// Makes commits report that nothing changed.
    pub fn nothing_to_commit(&self, enabled: bool) {
        self.state.lock().nothing_to_commit = enabled;
    }

    fn check(&self, step: &'static str) -> Result<()> {
        if self.state.lock().fail_next.remove(step) {
            Err(StoreError::backend(step, "injected failure"))
        } else {
            Ok(())
        }
    }

    fn record(&self, call: Call) {
        self.state.lock().calls.push(call);
    }
}

impl RevisionBackend for FakeBackend {
    fn init(&self, work_tree: &Path, git_dir: &Path) -> Result<()> {
        self.check("init")?;
        fs::create_dir_all(git_dir).map_err(|e| StoreError::io(git_dir, e))?;
        fs::write(git_dir.join("HEAD"), "ref: refs/heads/main\n")
            .map_err(|e| StoreError::io(git_dir, e))?;
        let link = work_tree.join(".git");
        fs::write(&link, format!("gitdir: {}\n", git_dir.display()))
            .map_err(|e| StoreError::io(&link, e))?;
        self.record(Call::Init {
            work_tree: work_tree.to_path_buf(),
            git_dir: git_dir.to_path_buf(),
        });
        Ok(())
    }

    fn stage(&self, _work_tree: &Path, path: &Path) -> Result<()> {
        self.check("stage")?;
        self.record(Call::Stage(path.to_path_buf()));
        Ok(())
    }

    fn commit(&self, _work_tree: &Path, message: &str) -> Result<CommitOutcome> {
        self.check("commit")?;
        self.record(Call::Commit(message.to_string()));
        if self.state.lock().nothing_to_commit {
            Ok(CommitOutcome::NothingToCommit)
        } else {
            Ok(CommitOutcome::Committed)
        }
    }

    fn mirror(&self, source: &Path, destination: &Path) -> Result<()> {
        self.check("mirror")?;
        fs::create_dir_all(destination).map_err(|e| StoreError::io(destination, e))?;
        fs::write(destination.join("HEAD"), "ref: refs/heads/main\n")
            .map_err(|e| StoreError::io(destination, e))?;
        self.record(Call::Mirror {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
        });
        Ok(())
    }

    fn status(&self, work_tree: &Path) -> bool {
        work_tree.join(".git").is_file()
    }
}
