//! The coalescing cache and its flush timer.

use crate::output::SinkOutput;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Severity of an audit line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    message: String,
    level: Level,
    count: u64,
    last_seen: Instant,
    last_seen_wall: DateTime<Local>,
}

impl Entry {
    fn format(&self) -> String {
        let timestamp = self.last_seen_wall.format("%Y-%m-%d %H:%M:%S");
        if self.count > 1 {
            format!(
                "[{}] [{}] {} | [{}]",
                timestamp, self.level, self.message, self.count
            )
        } else {
            format!("[{}] [{}] {}", timestamp, self.level, self.message)
        }
    }
}

/// Entries keyed by fingerprint, plus their first-seen order.
///
/// `queue` and `entries` always hold the same set of fingerprints.
#[derive(Debug, Default)]
struct Cache {
    entries: HashMap<u64, Entry>,
    queue: VecDeque<u64>,
}

impl Cache {
    fn record(&mut self, message: String, level: Level, now: Instant, wall: DateTime<Local>) {
        let key = fingerprint(&message, level);
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.count += 1;
                entry.last_seen = now;
                entry.last_seen_wall = wall;
            }
            None => {
                self.entries.insert(
                    key,
                    Entry {
                        message,
                        level,
                        count: 1,
                        last_seen: now,
                        last_seen_wall: wall,
                    },
                );
                self.queue.push_back(key);
            }
        }
    }

    /// Pops entries from the front while they are older than `window`.
    ///
    /// Stops at the first entry still inside the window, even if entries
    /// behind it are stale. The queue is ordered by first sighting, not
    /// by last sighting.
    fn drain_expired(&mut self, now: Instant, window: Duration) -> Vec<Entry> {
        let mut drained = Vec::new();
        while let Some(key) = self.queue.front().copied() {
            let expired = match self.entries.get(&key) {
                Some(entry) => now.saturating_duration_since(entry.last_seen) >= window,
                None => true,
            };
            if !expired {
                break;
            }
            self.queue.pop_front();
            if let Some(entry) = self.entries.remove(&key) {
                drained.push(entry);
            }
        }
        drained
    }

    fn drain_all(&mut self) -> Vec<Entry> {
        let mut drained = Vec::with_capacity(self.queue.len());
        while let Some(key) = self.queue.pop_front() {
            if let Some(entry) = self.entries.remove(&key) {
                drained.push(entry);
            }
        }
        self.entries.clear();
        drained
    }
}

fn fingerprint(message: &str, level: Level) -> u64 {
    let mut hasher = DefaultHasher::new();
    message.hash(&mut hasher);
    level.hash(&mut hasher);
    hasher.finish()
}

struct Inner {
    name: String,
    window: Duration,
    cache: Mutex<Cache>,
    outputs: Vec<Box<dyn SinkOutput>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn flush_expired(&self) {
        let mut cache = self.cache.lock();
        let drained = cache.drain_expired(Instant::now(), self.window);
        self.emit(&drained);
    }

    // Called with the cache lock held so lines from concurrent flushes
    // never interleave.
    fn emit(&self, entries: &[Entry]) {
        for entry in entries {
            let line = entry.format();
            for output in &self.outputs {
                if let Err(e) = output.write_line(&line) {
                    warn!("{} log: failed to write line: {}", self.name, e);
                }
            }
        }
    }
}

/// A log sink that coalesces repeated messages.
///
/// Cloning is cheap; clones share the same cache and outputs.
#[derive(Clone)]
pub struct DebouncedSink {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DebouncedSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebouncedSink")
            .field("name", &self.inner.name)
            .field("window", &self.inner.window)
            .field("outputs", &self.inner.outputs.len())
            .finish()
    }
}

impl DebouncedSink {
    /// Creates a sink writing to every given output.
    pub fn new(name: impl Into<String>, window: Duration, outputs: Vec<Box<dyn SinkOutput>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                window,
                cache: Mutex::new(Cache::default()),
                outputs,
                timer: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn window(&self) -> Duration {
        self.inner.window
    }

    /// Records a message.
    ///
    /// Entries that have been quiet for a full window are written out
    /// right away; the rest wait for the flush timer, which this call
    /// rearms.
    pub fn log(&self, message: impl Into<String>, level: Level) {
        let now = Instant::now();
        {
            let mut cache = self.inner.cache.lock();
            cache.record(message.into(), level, now, Local::now());
            let drained = cache.drain_expired(now, self.inner.window);
            self.inner.emit(&drained);
        }
        self.rearm();
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(message, Level::Info);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(message, Level::Warning);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(message, Level::Error);
    }

    /// Writes every cached entry in first-seen order and empties the cache.
    pub fn flush_all(&self) {
        if let Some(pending) = self.inner.timer.lock().take() {
            pending.abort();
        }
        let mut cache = self.inner.cache.lock();
        let drained = cache.drain_all();
        if !drained.is_empty() {
            debug!("{} log: flushing {} pending entries", self.inner.name, drained.len());
        }
        self.inner.emit(&drained);
    }

    /// Number of entries waiting to be written.
    pub fn pending(&self) -> usize {
        self.inner.cache.lock().queue.len()
    }

    fn rearm(&self) {
        // Without a runtime there is no timer; the inline pass in `log`
        // and `flush_all` still write everything out.
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => return,
        };

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let window = self.inner.window;

        let mut timer = self.inner.timer.lock();
        if let Some(previous) = timer.take() {
            previous.abort();
        }
        *timer = Some(handle.spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(inner) = weak.upgrade() {
                inner.flush_expired();
            }
        }));
    }
}
