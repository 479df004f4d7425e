//! Backup rotation.
//!
//! Snapshots are directories named after the moment they were taken:
//!
//! ```text
//! snapshots/
//!   2026_10_18_09_00_00.git
//!   2026_10_18_10_00_00.git
//! ```
//!
//! Retention orders them by the timestamp parsed from the name, never by
//! directory listing order, and keeps a bounded number of the newest.

use crate::error::{Result, StoreError};
use chrono::NaiveDateTime;
use std::fs;
use std::path::{Path, PathBuf};

/// Timestamp layout embedded in snapshot directory names.
pub const SNAPSHOT_TIME_FORMAT: &str = "%Y_%m_%d_%H_%M_%S";

/// Suffix of snapshot directory names.
pub const SNAPSHOT_SUFFIX: &str = ".git";

/// Number of rotated snapshots kept per watched directory.
pub const DEFAULT_RETENTION: usize = 6;

/// A full mirror of the history taken at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Snapshot {
    /// When the snapshot was taken. Compared first, so sorting is chronological.
    pub taken_at: NaiveDateTime,
    pub path: PathBuf,
}

impl Snapshot {
    /// The snapshot that a backup taken at `taken_at` would produce.
    pub fn at(snapshots_dir: &Path, taken_at: NaiveDateTime) -> Self {
        let name = format!("{}{}", taken_at.format(SNAPSHOT_TIME_FORMAT), SNAPSHOT_SUFFIX);
        Self {
            taken_at,
            path: snapshots_dir.join(name),
        }
    }

    /// Recognizes a snapshot directory by its name.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let stamp = name.strip_suffix(SNAPSHOT_SUFFIX)?;
        let taken_at = NaiveDateTime::parse_from_str(stamp, SNAPSHOT_TIME_FORMAT).ok()?;
        Some(Self {
            taken_at,
            path: path.to_path_buf(),
        })
    }
}

/// What to keep and what to delete after a new snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPlan {
    /// Snapshots kept, oldest first.
    pub retained: Vec<Snapshot>,

    /// Snapshots to delete, oldest first. Empty while under the bound,
    /// a single entry in steady state.
    pub evicted: Vec<Snapshot>,
}

/// Decides which snapshots survive once `new` joins `existing`.
///
/// Pure: nothing on disk is touched. Once the combined set exceeds
/// `bound`, the oldest snapshots are evicted until exactly `bound`
/// remain.
pub fn plan_retention(existing: Vec<Snapshot>, new: Snapshot, bound: usize) -> RetentionPlan {
    let mut all = existing;
    if !all.iter().any(|snapshot| snapshot.path == new.path) {
        all.push(new);
    }
    all.sort();

    let excess = all.len().saturating_sub(bound);
    let retained = all.split_off(excess);
    RetentionPlan {
        retained,
        evicted: all,
    }
}

/// Lists recognizable snapshots under `dir`, oldest first.
///
/// Entries whose names do not carry a timestamp are left alone.
pub fn list_snapshots(dir: &Path) -> Result<Vec<Snapshot>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut snapshots = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))? {
        let entry = entry.map_err(|e| StoreError::io(dir, e))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if let Some(snapshot) = Snapshot::from_path(&path) {
            snapshots.push(snapshot);
        }
    }
    snapshots.sort();
    Ok(snapshots)
}

/// Deletes the evicted snapshots of a plan.
pub fn apply_plan(plan: &RetentionPlan) -> Result<Vec<PathBuf>> {
    let mut deleted = Vec::with_capacity(plan.evicted.len());
    for snapshot in &plan.evicted {
        fs::remove_dir_all(&snapshot.path).map_err(|e| StoreError::io(&snapshot.path, e))?;
        deleted.push(snapshot.path.clone());
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 18)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn snap(hour: u32, minute: u32) -> Snapshot {
        Snapshot::at(Path::new("/backups/snapshots"), at(hour, minute))
    }

    #[test]
    fn test_snapshot_name_round_trip() {
        let snapshot = snap(9, 30);
        assert_eq!(
            snapshot.path,
            PathBuf::from("/backups/snapshots/2026_10_18_09_30_00.git")
        );
        assert_eq!(Snapshot::from_path(&snapshot.path), Some(snapshot));
        assert_eq!(Snapshot::from_path(Path::new("/backups/snapshots/current.git")), None);
    }

    #[test]
    fn test_under_bound_keeps_everything() {
        let existing = vec![snap(1, 0), snap(2, 0)];
        let plan = plan_retention(existing, snap(3, 0), 6);
        assert_eq!(plan.retained.len(), 3);
        assert!(plan.evicted.is_empty());
    }

    #[test]
    fn test_over_bound_evicts_oldest() {
        // Deliberately unsorted
        let existing = vec![snap(5, 0), snap(1, 0), snap(3, 0), snap(2, 0), snap(6, 0), snap(4, 0)];
        let plan = plan_retention(existing, snap(7, 0), 6);

        assert_eq!(plan.retained.len(), 6);
        assert_eq!(plan.evicted, vec![snap(1, 0)]);
        assert_eq!(plan.retained.first(), Some(&snap(2, 0)));
        assert_eq!(plan.retained.last(), Some(&snap(7, 0)));
    }

    #[test]
    fn test_excess_beyond_one_is_trimmed_to_bound() {
        let existing = (0..9).map(|h| snap(h, 0)).collect();
        let plan = plan_retention(existing, snap(10, 0), 6);
        assert_eq!(plan.retained.len(), 6);
        assert_eq!(plan.evicted.len(), 4);
        assert_eq!(plan.evicted[0], snap(0, 0));
    }

    #[test]
    fn test_duplicate_new_snapshot_is_not_double_counted() {
        let existing = vec![snap(1, 0), snap(2, 0)];
        let plan = plan_retention(existing, snap(2, 0), 2);
        assert_eq!(plan.retained, vec![snap(1, 0), snap(2, 0)]);
        assert!(plan.evicted.is_empty());
    }

    #[test]
    fn test_list_and_apply_on_disk() {
        let dir = tempdir().unwrap();
        for h in 1..=3 {
            fs::create_dir_all(Snapshot::at(dir.path(), at(h, 0)).path).unwrap();
        }
        // Ignored: not a timestamped name, and a plain file
        fs::create_dir_all(dir.path().join("scratch")).unwrap();
        fs::write(dir.path().join("2026_10_18_00_00_00.git"), "not a dir").unwrap();

        let existing = list_snapshots(dir.path()).unwrap();
        assert_eq!(existing.len(), 3);

        let plan = plan_retention(existing, Snapshot::at(dir.path(), at(4, 0)), 2);
        let deleted = apply_plan(&plan).unwrap();

        assert_eq!(deleted.len(), 2);
        assert!(!Snapshot::at(dir.path(), at(1, 0)).path.exists());
        assert!(!Snapshot::at(dir.path(), at(2, 0)).path.exists());
        assert!(Snapshot::at(dir.path(), at(3, 0)).path.exists());
        assert!(dir.path().join("scratch").exists());
    }
}
