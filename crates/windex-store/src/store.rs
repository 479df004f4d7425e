//! The revision store adapter.
//!
//! One store per watched directory. The history lives outside the
//! watched tree so an intruder wiping the tree does not wipe the record
//! of what it looked like.

use crate::backend::{CommitOutcome, RevisionBackend};
use crate::error::{Result, StoreError};
use crate::rotation::{self, Snapshot, DEFAULT_RETENTION};
use chrono::{Local, NaiveDateTime};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use windex_core::ChangeEvent;
use windex_sink::DebouncedSink;

/// Commits between automatic backups.
pub const DEFAULT_BACKUP_THRESHOLD: u32 = 10;

/// Where a store keeps its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    /// The watched directory.
    pub work_tree: PathBuf,

    /// `<backup root>/<store identity>`.
    pub root: PathBuf,
}

impl StoreLayout {
    pub fn new(work_tree: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        Self {
            work_tree: work_tree.into(),
            root: root.into(),
        }
    }

    /// The live history's metadata directory.
    pub fn git_dir(&self) -> PathBuf {
        self.root.join("current.git")
    }

    /// Mirror taken once, right after initialization.
    pub fn initial_mirror(&self) -> PathBuf {
        self.root.join("initial.git")
    }

    /// Directory of rotated snapshots.
    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    /// Link file the backend leaves in the working tree.
    pub fn git_link(&self) -> PathBuf {
        self.work_tree.join(".git")
    }
}

/// Result of a backup request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    /// A new snapshot was written; `evicted` lists deleted old snapshots.
    Created { path: PathBuf, evicted: Vec<PathBuf> },
    /// A snapshot for this instant already exists; nothing was done.
    AlreadyExists(PathBuf),
}

/// Versioned history for one watched directory.
pub struct RevisionStore<B> {
    layout: StoreLayout,
    backend: B,
    log: DebouncedSink,
    commit_count: u32,
    backup_threshold: u32,
    retention: usize,
}

impl<B> std::fmt::Debug for RevisionStore<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevisionStore")
            .field("layout", &self.layout)
            .field("commit_count", &self.commit_count)
            .field("backup_threshold", &self.backup_threshold)
            .field("retention", &self.retention)
            .finish()
    }
}

impl<B: RevisionBackend> RevisionStore<B> {
    /// Creates a store handle. Nothing is written until
    /// [`ensure_initialized`](Self::ensure_initialized) runs.
    pub fn new(layout: StoreLayout, backend: B, log: DebouncedSink) -> Self {
        Self {
            layout,
            backend,
            log,
            commit_count: 0,
            backup_threshold: DEFAULT_BACKUP_THRESHOLD,
            retention: DEFAULT_RETENTION,
        }
    }

    /// Overrides how many commits trigger a backup.
    pub fn with_backup_threshold(mut self, threshold: u32) -> Self {
        self.backup_threshold = threshold;
        self
    }

    /// Overrides how many rotated snapshots are kept.
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Commits since the last automatic backup.
    pub fn commit_count(&self) -> u32 {
        self.commit_count
    }

    /// True if our history exists and is linked from the working tree.
    pub fn is_present(&self) -> bool {
        self.layout.git_dir().is_dir() && self.layout.git_link().is_file()
    }

    /// True if the history is present and the backend can read it.
    pub fn is_healthy(&self) -> bool {
        self.is_present() && self.backend.status(&self.layout.work_tree)
    }

    /// Creates the history if needed.
    ///
    /// Returns `Ok(false)` if it already existed, `Ok(true)` if it was
    /// created now. A freshly created history gets an initial commit of
    /// everything in the tree and one mirror backup.
    pub fn ensure_initialized(&mut self) -> Result<bool> {
        let work_tree = self.layout.work_tree.clone();
        let git_dir = self.layout.git_dir();

        if !work_tree.is_dir() {
            self.log
                .error(format!("Watch directory does not exist: {}", work_tree.display()));
            return Err(StoreError::MissingWorkTree(work_tree));
        }

        if self.is_present() {
            self.log.info("Repo already exists");
            return Ok(false);
        }

        // Something else owns the link (a user's own repository) or our
        // history is half there; refuse to stack a second one on top.
        let link = self.layout.git_link();
        if link.exists() {
            self.log
                .error(format!("A history already exists at {}", link.display()));
            return Err(StoreError::AlreadyInitialized(link));
        }
        if is_non_empty_dir(&git_dir) {
            self.log
                .error(format!("A history already exists at {}", git_dir.display()));
            return Err(StoreError::AlreadyInitialized(git_dir));
        }

        if let Some(parent) = git_dir.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        info!("Initializing history for {} in {}", work_tree.display(), git_dir.display());
        if let Err(e) = self.backend.init(&work_tree, &git_dir) {
            self.log.error(format!("Failed to initialize git repo: {}", e));
            return Err(e);
        }

        if has_tracked_content(&work_tree)? {
            if let Err(e) = self.backend.stage(&work_tree, &work_tree) {
                self.log.error(format!("Failed to add files to git: {}", e));
                return Err(e);
            }
            match self.backend.commit(&work_tree, "Initial commit") {
                Ok(CommitOutcome::Committed) => debug!("Initial commit written"),
                Ok(CommitOutcome::NothingToCommit) => debug!("Initial commit had nothing to record"),
                Err(e) => {
                    self.log.error(format!("Failed to commit files to git: {}", e));
                    return Err(e);
                }
            }
        } else {
            self.log.warning("No files in the directory");
        }

        self.backup_initial();
        self.log.info("Git repo initialized successfully");
        Ok(true)
    }

    fn backup_initial(&mut self) {
        let destination = self.layout.initial_mirror();
        if destination.exists() {
            warn!("Initial backup {} already exists, keeping it", destination.display());
            return;
        }
        self.log.info("Creating initial git repo backup");
        match self.backend.mirror(&self.layout.git_dir(), &destination) {
            Ok(()) => self.log.info("Initial git repo backup created successfully"),
            Err(e) => self.log.error(format!("Failed to clone git repo: {}", e)),
        }
    }

    /// Records the current content of the event's path.
    ///
    /// Content identical to the last revision counts as success. Every
    /// success bumps the commit counter; past the threshold a backup runs
    /// and the counter resets.
    pub fn commit(&mut self, event: &ChangeEvent) -> Result<CommitOutcome> {
        let work_tree = self.layout.work_tree.clone();
        let path = event.path.as_path();

        if !self.is_present() {
            self.log.error("Git repo does not exist");
            return Err(StoreError::NotInitialized(self.layout.git_dir()));
        }

        if !path.exists() {
            self.log
                .error(format!("File does not exist: {}", path.display()));
            return Err(StoreError::PathMissing(path.to_path_buf()));
        }

        if let Err(e) = self.backend.stage(&work_tree, path) {
            self.log.error(format!("Failed to add file to git: {}", e));
            return Err(e);
        }

        let outcome = match self.backend.commit(&work_tree, &event.describe()) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.log.error(format!("Failed to commit file to git: {}", e));
                return Err(e);
            }
        };

        self.log.info(event.describe());

        self.commit_count += 1;
        if self.commit_count > self.backup_threshold {
            debug!("{} commits since last backup, backing up", self.commit_count);
            // backup_at logs every failure; the commit itself stands.
            if let Err(e) = self.backup() {
                debug!("Threshold backup failed: {}", e);
            }
            self.commit_count = 0;
        }

        Ok(outcome)
    }

    /// Writes a timestamped mirror of the history, then enforces retention.
    pub fn backup(&mut self) -> Result<BackupOutcome> {
        self.backup_at(Local::now().naive_local())
    }

    /// Like [`backup`](Self::backup) with an explicit timestamp.
    pub fn backup_at(&mut self, taken_at: NaiveDateTime) -> Result<BackupOutcome> {
        let git_dir = self.layout.git_dir();
        if !git_dir.is_dir() {
            self.log.error("Repo does not exist");
            return Err(StoreError::NotInitialized(git_dir));
        }

        let snapshots_dir = self.layout.snapshots_dir();
        if let Err(e) = fs::create_dir_all(&snapshots_dir) {
            self.log.error(format!(
                "Failed to create backup directory {}: {}",
                snapshots_dir.display(),
                e
            ));
            return Err(StoreError::io(&snapshots_dir, e));
        }

        let snapshot = Snapshot::at(&snapshots_dir, taken_at);
        if snapshot.path.exists() {
            debug!("Backup {} already exists", snapshot.path.display());
            return Ok(BackupOutcome::AlreadyExists(snapshot.path));
        }

        let existing = match rotation::list_snapshots(&snapshots_dir) {
            Ok(existing) => existing,
            Err(e) => {
                self.log.error(format!("Failed to list backups: {}", e));
                return Err(e);
            }
        };

        if let Err(e) = self.backend.mirror(&git_dir, &snapshot.path) {
            self.log.error(format!("Failed to backup git directory: {}", e));
            return Err(e);
        }
        self.log.info("Backup created successfully");

        let path = snapshot.path.clone();
        let plan = rotation::plan_retention(existing, snapshot, self.retention);
        let evicted = match rotation::apply_plan(&plan) {
            Ok(evicted) => evicted,
            Err(e) => {
                self.log.error(format!("Failed to delete old backup: {}", e));
                return Err(e);
            }
        };
        for old in &evicted {
            self.log
                .info(format!("Deleted oldest backup {}", old.display()));
        }

        Ok(BackupOutcome::Created { path, evicted })
    }
}

fn is_non_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// True if the tree holds anything besides the backend's link file.
fn has_tracked_content(work_tree: &Path) -> Result<bool> {
    let entries = fs::read_dir(work_tree).map_err(|e| StoreError::io(work_tree, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io(work_tree, e))?;
        if entry.file_name() != ".git" {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{Call, FakeBackend};
    use chrono::NaiveDate;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use windex_core::EventKind;
    use windex_sink::Capture;

    struct Fixture {
        _dir: TempDir,
        work_tree: PathBuf,
        backend: FakeBackend,
        capture: Capture,
        store: RevisionStore<FakeBackend>,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let work_tree = dir.path().join("project");
        fs::create_dir(&work_tree).unwrap();
        let backend = FakeBackend::new();
        let capture = Capture::new();
        let log = DebouncedSink::new("git", Duration::from_secs(2), vec![Box::new(capture.clone())]);
        let layout = StoreLayout::new(&work_tree, dir.path().join("backups").join("project_x"));
        let store = RevisionStore::new(layout, backend.clone(), log);
        Fixture {
            _dir: dir,
            work_tree,
            backend,
            capture,
            store,
        }
    }

    fn at(second: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 18)
            .unwrap()
            .and_hms_opt(12, 0, second)
            .unwrap()
    }

    fn commits(backend: &FakeBackend) -> Vec<String> {
        backend
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Commit(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    fn mirrors(backend: &FakeBackend) -> usize {
        backend
            .calls()
            .iter()
            .filter(|call| matches!(call, Call::Mirror { .. }))
            .count()
    }

    #[test]
    fn test_ensure_initialized_is_idempotent() {
        let mut f = fixture();
        fs::write(f.work_tree.join("a.txt"), "hello").unwrap();

        assert!(f.store.ensure_initialized().unwrap());
        assert!(f.store.is_present());
        assert!(!f.store.ensure_initialized().unwrap());
        assert!(f.store.is_healthy());

        assert_eq!(commits(&f.backend), vec!["Initial commit".to_string()]);
        assert_eq!(mirrors(&f.backend), 1);
        assert!(f.store.layout().initial_mirror().is_dir());
    }

    #[test]
    fn test_empty_directory_skips_initial_commit() {
        let mut f = fixture();
        assert!(f.store.ensure_initialized().unwrap());
        assert!(commits(&f.backend).is_empty());

        f.store.log.flush_all();
        assert!(f
            .capture
            .lines()
            .iter()
            .any(|line| line.contains("[WARNING] No files in the directory")));
    }

    #[test]
    fn test_missing_work_tree_fails() {
        let mut f = fixture();
        fs::remove_dir(&f.work_tree).unwrap();
        assert!(matches!(
            f.store.ensure_initialized(),
            Err(StoreError::MissingWorkTree(_))
        ));
    }

    #[test]
    fn test_foreign_history_is_refused() {
        let mut f = fixture();
        fs::create_dir(f.work_tree.join(".git")).unwrap();
        assert!(matches!(
            f.store.ensure_initialized(),
            Err(StoreError::AlreadyInitialized(_))
        ));
        assert!(f.backend.calls().is_empty());
    }

    #[test]
    fn test_init_failure_is_reported() {
        let mut f = fixture();
        f.backend.fail_next("init");
        assert!(f.store.ensure_initialized().is_err());
        assert!(!f.store.is_present());
    }

    #[test]
    fn test_commit_stages_exactly_the_path() {
        let mut f = fixture();
        f.store.ensure_initialized().unwrap();

        let file = f.work_tree.join("a.txt");
        fs::write(&file, "v1").unwrap();
        let event = ChangeEvent::new(EventKind::Create, &file);

        assert_eq!(f.store.commit(&event).unwrap(), CommitOutcome::Committed);
        assert!(f.backend.calls().contains(&Call::Stage(file.clone())));
        assert_eq!(
            commits(&f.backend).last().cloned(),
            Some(format!("CREATE - {}", file.display()))
        );
        assert_eq!(f.store.commit_count(), 1);
    }

    #[test]
    fn test_nothing_to_commit_is_success() {
        let mut f = fixture();
        f.store.ensure_initialized().unwrap();
        let file = f.work_tree.join("same.txt");
        fs::write(&file, "unchanged").unwrap();

        f.backend.nothing_to_commit(true);
        let event = ChangeEvent::new(EventKind::Attrib, &file);
        assert_eq!(f.store.commit(&event).unwrap(), CommitOutcome::NothingToCommit);
        assert_eq!(f.store.commit_count(), 1);
    }

    #[test]
    fn test_commit_of_missing_path_fails_without_counting() {
        let mut f = fixture();
        f.store.ensure_initialized().unwrap();

        let event = ChangeEvent::new(EventKind::Delete, f.work_tree.join("payload.bin"));
        assert!(matches!(
            f.store.commit(&event),
            Err(StoreError::PathMissing(_))
        ));
        assert_eq!(f.store.commit_count(), 0);

        f.store.log.flush_all();
        assert!(f
            .capture
            .lines()
            .iter()
            .any(|line| line.contains("[ERROR] File does not exist")));
    }

    #[test]
    fn test_commit_without_history_fails() {
        let mut f = fixture();
        let file = f.work_tree.join("a.txt");
        fs::write(&file, "x").unwrap();
        let event = ChangeEvent::new(EventKind::Modify, &file);
        assert!(matches!(
            f.store.commit(&event),
            Err(StoreError::NotInitialized(_))
        ));
    }

    #[test]
    fn test_eleventh_commit_triggers_one_backup_and_resets() {
        let mut f = fixture();
        f.store.ensure_initialized().unwrap();
        let initial_mirrors = mirrors(&f.backend);

        for i in 0..10 {
            let file = f.work_tree.join(format!("file{}.txt", i));
            fs::write(&file, "x").unwrap();
            f.store
                .commit(&ChangeEvent::new(EventKind::Create, &file))
                .unwrap();
        }
        assert_eq!(f.store.commit_count(), 10);
        assert_eq!(mirrors(&f.backend), initial_mirrors);

        let file = f.work_tree.join("file10.txt");
        fs::write(&file, "x").unwrap();
        f.store
            .commit(&ChangeEvent::new(EventKind::Create, &file))
            .unwrap();

        assert_eq!(mirrors(&f.backend), initial_mirrors + 1);
        assert_eq!(f.store.commit_count(), 0);
        assert_eq!(
            rotation::list_snapshots(&f.store.layout().snapshots_dir())
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_backup_rotation_keeps_bound() {
        let mut f = fixture();
        f.store.ensure_initialized().unwrap();

        for second in 0..6 {
            f.store.backup_at(at(second)).unwrap();
        }
        let outcome = f.store.backup_at(at(6)).unwrap();

        let oldest = Snapshot::at(&f.store.layout().snapshots_dir(), at(0)).path;
        assert_eq!(
            outcome,
            BackupOutcome::Created {
                path: Snapshot::at(&f.store.layout().snapshots_dir(), at(6)).path,
                evicted: vec![oldest.clone()],
            }
        );
        assert!(!oldest.exists());

        let remaining = rotation::list_snapshots(&f.store.layout().snapshots_dir()).unwrap();
        assert_eq!(remaining.len(), DEFAULT_RETENTION);
        assert_eq!(remaining[0].taken_at, at(1));
    }

    #[test]
    fn test_backup_twice_in_same_second_is_a_noop() {
        let mut f = fixture();
        f.store.ensure_initialized().unwrap();

        f.store.backup_at(at(30)).unwrap();
        let mirrors_before = mirrors(&f.backend);
        let again = f.store.backup_at(at(30)).unwrap();

        assert!(matches!(again, BackupOutcome::AlreadyExists(_)));
        assert_eq!(mirrors(&f.backend), mirrors_before);
    }

    #[test]
    fn test_failed_backup_is_logged_and_returned() {
        let mut f = fixture();
        f.store.ensure_initialized().unwrap();
        f.backend.fail_next("mirror");

        assert!(f.store.backup_at(at(1)).is_err());
        f.store.log.flush_all();
        assert!(f
            .capture
            .lines()
            .iter()
            .any(|line| line.contains("[ERROR] Failed to backup git directory")));
    }

    #[test]
    fn test_unwritable_snapshot_dir_is_logged_on_threshold_backup() {
        let mut f = fixture();
        f.store.ensure_initialized().unwrap();
        fs::write(f.store.layout().snapshots_dir(), "not a directory").unwrap();

        for i in 0..=DEFAULT_BACKUP_THRESHOLD {
            let file = f.work_tree.join(format!("file{}.txt", i));
            fs::write(&file, "x").unwrap();
            f.store
                .commit(&ChangeEvent::new(EventKind::Create, &file))
                .unwrap();
        }
        assert_eq!(f.store.commit_count(), 0);

        f.store.log.flush_all();
        assert!(f
            .capture
            .lines()
            .iter()
            .any(|line| line.contains("[ERROR] Failed to create backup directory")));
    }

    #[test]
    fn test_backup_without_history_fails() {
        let mut f = fixture();
        assert!(matches!(
            f.store.backup_at(at(1)),
            Err(StoreError::NotInitialized(_))
        ));
    }
}
