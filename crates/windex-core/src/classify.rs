//! Event classification.
//!
//! Decides, per event, whether it should reach the revision store, the
//! access log, or nowhere at all. Noise (editor swap files, partial
//! downloads, lock files, our own metadata) is dropped here so it never
//! produces a commit.

use crate::event::ChangeEvent;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, trace};

/// Outcome of classifying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// A substantive change that should be recorded.
    Relevant {
        /// The path was gone by the time we looked and the event was not a
        /// delete. Often a file dropped and removed straight away.
        vanished: bool,
    },
    /// Read or close without writing; goes to the access log only.
    AccessOnly,
    /// Noise; dropped silently.
    Ignored,
}

/// Rules the classifier applies.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Path components marking revision-store metadata.
    pub store_markers: Vec<String>,

    /// File name suffixes that are never recorded.
    pub noise_suffixes: Vec<String>,

    /// Trees that are never recorded (virtual filesystems, our own output).
    pub ignored_roots: Vec<PathBuf>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            store_markers: vec![".git".to_string()],
            noise_suffixes: [
                ".swp",
                ".swx",
                ".swpx",
                "~",
                ".part",
                ".crdownload",
                ".tmp",
                ".temp",
                ".lock",
                ".log",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            ignored_roots: ["/proc", "/sys", "/run"].iter().map(PathBuf::from).collect(),
        }
    }
}

impl ClassifierConfig {
    /// Adds another root whose contents are ignored.
    pub fn ignore_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.ignored_roots.push(root.into());
        self
    }
}

/// Sorts raw events into relevant, access-only and ignored.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    config: ClassifierConfig,
}

impl Classifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Classifies an event, checking the disk to detect vanished files.
    pub fn classify(&self, event: &ChangeEvent) -> Classification {
        self.classify_with(event, |path| path.exists())
    }

    /// Classifies an event with a caller-supplied existence check.
    pub fn classify_with<F>(&self, event: &ChangeEvent, exists: F) -> Classification
    where
        F: FnOnce(&Path) -> bool,
    {
        if self.is_ignored(&event.path) {
            trace!("Ignoring noise path {}", event.path.display());
            return Classification::Ignored;
        }

        if event.kind.is_access_like() {
            return Classification::AccessOnly;
        }

        let vanished = !event.kind.is_delete() && !exists(&event.path);
        if vanished {
            debug!("{} is gone after a {} event", event.path.display(), event.kind);
        }
        Classification::Relevant { vanished }
    }

    /// True if the path is noise regardless of the event kind.
    pub fn is_ignored(&self, path: &Path) -> bool {
        if self.has_store_marker(path) {
            return true;
        }

        if self
            .config
            .ignored_roots
            .iter()
            .any(|root| path.starts_with(root))
        {
            return true;
        }

        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => return false,
        };

        // Hidden files
        if name.starts_with('.') {
            return true;
        }

        self.config
            .noise_suffixes
            .iter()
            .any(|suffix| name.ends_with(suffix.as_str()))
    }

    fn has_store_marker(&self, path: &Path) -> bool {
        path.components().any(|component| match component {
            Component::Normal(part) => self
                .config
                .store_markers
                .iter()
                .any(|marker| part == marker.as_str()),
            _ => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use std::fs;
    use tempfile::tempdir;

    fn event(kind: EventKind, path: &str) -> ChangeEvent {
        ChangeEvent::new(kind, path)
    }

    #[test]
    fn test_store_metadata_is_ignored() {
        let classifier = Classifier::default();
        let e = event(EventKind::Modify, "/data/project/.git/index");
        assert_eq!(classifier.classify_with(&e, |_| true), Classification::Ignored);
    }

    #[test]
    fn test_noise_suffixes_are_ignored() {
        let classifier = Classifier::default();
        for path in [
            "/data/project/notes.txt.swp",
            "/data/project/setup.iso.part",
            "/data/project/big.zip.crdownload",
            "/data/project/Cargo.lock",
            "/data/project/server.log",
            "/data/project/draft.md~",
        ] {
            let e = event(EventKind::Modify, path);
            assert_eq!(
                classifier.classify_with(&e, |_| true),
                Classification::Ignored,
                "{} should be ignored",
                path
            );
        }
    }

    #[test]
    fn test_ignored_roots_and_hidden_files() {
        let classifier = Classifier::default();
        let proc_event = event(EventKind::Modify, "/proc/1/status");
        assert_eq!(
            classifier.classify_with(&proc_event, |_| true),
            Classification::Ignored
        );

        let hidden = event(EventKind::Create, "/data/project/.env");
        assert_eq!(
            classifier.classify_with(&hidden, |_| true),
            Classification::Ignored
        );

        // A sibling that only shares a prefix is not under /run
        let runner = event(EventKind::Modify, "/runner/job.sh");
        assert_eq!(
            classifier.classify_with(&runner, |_| true),
            Classification::Relevant { vanished: false }
        );
    }

    #[test]
    fn test_extra_ignored_root() {
        let classifier = Classifier::new(ClassifierConfig::default().ignore_root("/data/backups"));
        let e = event(EventKind::Create, "/data/backups/snap/HEAD");
        assert_eq!(classifier.classify_with(&e, |_| true), Classification::Ignored);
    }

    #[test]
    fn test_access_and_close_events_are_access_only() {
        let classifier = Classifier::default();
        let access = event(EventKind::AccessOnly, "/data/project/a.txt");
        let close = event(EventKind::CloseWrite, "/data/project/a.txt");
        assert_eq!(classifier.classify_with(&access, |_| true), Classification::AccessOnly);
        assert_eq!(classifier.classify_with(&close, |_| true), Classification::AccessOnly);
    }

    #[test]
    fn test_vanished_file_is_flagged() {
        let dir = tempdir().unwrap();
        let present = dir.path().join("a.txt");
        fs::write(&present, "hello").unwrap();
        let missing = dir.path().join("payload.bin");

        let classifier = Classifier::default();

        let e = ChangeEvent::new(EventKind::Modify, &present);
        assert_eq!(classifier.classify(&e), Classification::Relevant { vanished: false });

        let e = ChangeEvent::new(EventKind::Create, &missing);
        assert_eq!(classifier.classify(&e), Classification::Relevant { vanished: true });

        // Deletes are expected to be gone
        let e = ChangeEvent::new(EventKind::Delete, &missing);
        assert_eq!(classifier.classify(&e), Classification::Relevant { vanished: false });
    }
}
