//! The watch session.
//!
//! A session owns everything one auditor run needs: the three log sinks,
//! the classifier, the revision store and the host platform. It moves
//! through fixed phases:
//!
//! ```text
//! Uninitialized -> DependenciesChecked -> StoreReady -> Watching -> ShuttingDown -> Terminated
//! ```
//!
//! Events are handled strictly in arrival order. Scheduled backups run on
//! their own task; the store sits behind an async mutex so a backup and a
//! commit never overlap.

use crate::audit;
use crate::error::{Result, WatchError};
use crate::platform::{CommandRunner, Platform, SystemRunner};
use crate::source::{EventBackend, EventSource, INOTIFY_PROGRAM};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use windex_core::{ChangeEvent, Classification, Classifier, ClassifierConfig, WatchConfig};
use windex_sink::{Console, DebouncedSink, LogFile, SinkOutput};
use windex_store::{
    BackupOutcome, CommitOutcome, GitCli, RevisionBackend, RevisionStore, StoreError, StoreLayout,
};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    DependenciesChecked,
    StoreReady,
    Watching,
    ShuttingDown,
    Terminated,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::DependenciesChecked => "dependencies checked",
            Self::StoreReady => "store ready",
            Self::Watching => "watching",
            Self::ShuttingDown => "shutting down",
            Self::Terminated => "terminated",
        };
        write!(f, "{}", s)
    }
}

/// Why the event loop stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The shutdown signal fired.
    Interrupted,
    /// The event source ran dry.
    SourceClosed,
}

/// What happened to one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ignored,
    /// Written to the access log only.
    Accessed,
    Committed(CommitOutcome),
    /// The commit failed; the loop carries on.
    Failed,
    /// No history existed, so the event was dropped.
    Dropped,
}

/// The three audit sinks of a session.
#[derive(Debug, Clone)]
pub struct Sinks {
    /// Console and main log file.
    pub main: DebouncedSink,
    /// Access log file.
    pub access: DebouncedSink,
    /// Store log file: commits, backups and store failures.
    pub store: DebouncedSink,
}

impl Sinks {
    pub fn new(main: DebouncedSink, access: DebouncedSink, store: DebouncedSink) -> Self {
        Self {
            main,
            access,
            store,
        }
    }

    /// Opens the sinks at the locations in `config`.
    pub fn open(config: &WatchConfig) -> Result<Self> {
        let window = config.debounce;

        let main_outputs: Vec<Box<dyn SinkOutput>> = vec![
            Box::new(Console),
            Box::new(LogFile::new(&config.main_log_file)?),
        ];
        let access_outputs: Vec<Box<dyn SinkOutput>> =
            vec![Box::new(LogFile::new(&config.access_log_file)?)];
        let store_outputs: Vec<Box<dyn SinkOutput>> =
            vec![Box::new(LogFile::new(&config.git_log_file)?)];

        Ok(Self::new(
            DebouncedSink::new("main", window, main_outputs),
            DebouncedSink::new("access", window, access_outputs),
            DebouncedSink::new("git", window, store_outputs),
        ))
    }

    /// Writes out everything still pending in every sink.
    pub fn flush_all(&self) {
        self.main.flush_all();
        self.access.flush_all();
        self.store.flush_all();
    }
}

/// Options that are not part of [`WatchConfig`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionOptions {
    pub backend: EventBackend,
    /// Register a kernel audit rule on the watched directory.
    pub audit: bool,
}

/// At most one backup in flight.
#[derive(Debug, Clone, Default)]
struct BackupSlot(Arc<AtomicBool>);

/// Released when dropped.
#[derive(Debug)]
struct BackupClaim(Arc<AtomicBool>);

impl BackupSlot {
    fn try_claim(&self) -> Option<BackupClaim> {
        if self.0.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(BackupClaim(Arc::clone(&self.0)))
        }
    }
}

impl Drop for BackupClaim {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One run of the auditor over one directory.
pub struct WatchSession<B, R = SystemRunner> {
    config: WatchConfig,
    options: SessionOptions,
    phase: Phase,
    sinks: Sinks,
    classifier: Classifier,
    store: Arc<Mutex<RevisionStore<B>>>,
    platform: Arc<Platform<R>>,
    backups: BackupSlot,
}

impl<B, R> std::fmt::Debug for WatchSession<B, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchSession")
            .field("watch_dir", &self.config.watch_dir)
            .field("phase", &self.phase)
            .field("options", &self.options)
            .finish()
    }
}

impl WatchSession<GitCli, SystemRunner> {
    /// Session on the real host, logging to the configured files and
    /// keeping history with git.
    pub fn open(config: WatchConfig, options: SessionOptions) -> Result<Self> {
        let sinks = Sinks::open(&config)?;
        let platform = Platform::system(config.debug);
        Ok(Self::new(config, options, sinks, GitCli::new(), platform))
    }
}

impl<B, R> WatchSession<B, R>
where
    B: RevisionBackend + 'static,
    R: CommandRunner + 'static,
{
    pub fn new(
        config: WatchConfig,
        options: SessionOptions,
        sinks: Sinks,
        backend: B,
        platform: Platform<R>,
    ) -> Self {
        // Our own output must never feed back into the history, unless
        // the user chose to watch a directory inside it.
        let mut classifier_config = ClassifierConfig::default();
        for root in [&config.backup_root, &config.log_dir] {
            if !config.watch_dir.starts_with(root) {
                classifier_config = classifier_config.ignore_root(root);
            }
        }

        let layout = StoreLayout::new(&config.watch_dir, config.store_dir());
        let store = RevisionStore::new(layout, backend, sinks.store.clone());

        Self {
            config,
            options,
            phase: Phase::Uninitialized,
            sinks,
            classifier: Classifier::new(classifier_config),
            store: Arc::new(Mutex::new(store)),
            platform: Arc::new(platform),
            backups: BackupSlot::default(),
        }
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn sinks(&self) -> &Sinks {
        &self.sinks
    }

    /// Runs `f` against the store on the blocking pool, once any backup
    /// or commit in progress has finished.
    pub async fn with_store<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut RevisionStore<B>) -> T + Send + 'static,
        T: Send + 'static,
    {
        let mut guard = Arc::clone(&self.store).lock_owned().await;
        let value = tokio::task::spawn_blocking(move || f(&mut *guard)).await?;
        Ok(value)
    }

    /// Runs `f` against the host platform on the blocking pool.
    async fn with_platform<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Platform<R>) -> T + Send + 'static,
        T: Send + 'static,
    {
        let platform = Arc::clone(&self.platform);
        let value = tokio::task::spawn_blocking(move || f(&platform)).await?;
        Ok(value)
    }

    /// Tools the session shells out to, as (command, package) pairs.
    pub fn required_tools(&self) -> Vec<(&'static str, &'static str)> {
        let mut tools = Vec::new();
        if self.options.backend == EventBackend::Inotify {
            tools.push((INOTIFY_PROGRAM, "inotify-tools"));
        }
        tools.push(("git", "git"));
        if self.options.audit {
            tools.push((audit::AUDITCTL, "auditd"));
        }
        tools
    }

    /// Makes sure every required tool is present, installing missing ones.
    pub async fn check_dependencies(&mut self) -> Result<()> {
        self.sinks.main.info("Checking dependencies");
        if self.config.debug {
            self.sinks
                .main
                .info("Debug mode is enabled, packages will not be installed");
        }

        for (command, package) in self.required_tools() {
            if self
                .with_platform(move |platform| platform.command_exists(command))
                .await?
            {
                self.sinks
                    .main
                    .info(format!("{} package is already installed", package));
                continue;
            }

            self.sinks.main.info(format!("Installing {} package", package));
            if !self
                .with_platform(move |platform| platform.install(package))
                .await?
            {
                self.sinks
                    .main
                    .error(format!("Failed to install {} package", package));
                return Err(WatchError::Dependency {
                    tool: command.to_string(),
                });
            }
        }

        self.phase = Phase::DependenciesChecked;
        Ok(())
    }

    /// Creates the history if needed and registers the audit rule.
    ///
    /// Returns true if the history was created by this call.
    pub async fn prepare_store(&mut self) -> Result<bool> {
        let created = match self.with_store(|store| store.ensure_initialized()).await? {
            Ok(created) => created,
            Err(e) => {
                self.sinks
                    .main
                    .error(format!("Failed to initialize git repo: {}", e));
                return Err(WatchError::Init(e));
            }
        };

        if created {
            self.sinks.main.info("Git repo initialized");
        } else if self.with_store(|store| store.is_healthy()).await? {
            self.sinks.main.info("Git repo already exists");
        } else {
            self.sinks.main.warning(format!(
                "Existing history for {} does not respond to git status",
                self.config.watch_dir.display()
            ));
        }

        if self.options.audit {
            let dir = self.config.watch_dir.clone();
            let registered = self
                .with_platform(move |platform| audit::register_watch_rule(platform, &dir))
                .await?;
            match registered {
                Ok(()) => self.sinks.main.info("Audit rule registered"),
                Err(e) => self
                    .sinks
                    .main
                    .warning(format!("Audit rule not registered: {}", e)),
            }
        }

        self.phase = Phase::StoreReady;
        Ok(created)
    }

    /// Consumes `source` until it closes or `shutdown` resolves.
    ///
    /// Malformed lines and failed commits are logged and skipped. Only a
    /// failing source ends the loop with an error. Scheduled backups run
    /// for as long as the loop does.
    pub async fn run<F>(&mut self, source: &mut EventSource, shutdown: F) -> Result<LoopExit>
    where
        F: Future<Output = ()>,
    {
        if self.phase != Phase::StoreReady {
            warn!("Starting watch loop in phase '{}'", self.phase);
        }
        self.phase = Phase::Watching;
        self.sinks.main.info(format!(
            "Watching {} with the {} backend",
            self.config.watch_dir.display(),
            self.options.backend
        ));

        let ticker = self.spawn_backup_ticker();
        tokio::pin!(shutdown);

        let exit = loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break Ok(LoopExit::Interrupted);
                }
                line = source.next_line() => match line {
                    Ok(Some(line)) => {
                        self.handle_bytes(&line).await;
                    }
                    Ok(None) => {
                        info!("Event source closed");
                        break Ok(LoopExit::SourceClosed);
                    }
                    Err(e) => {
                        self.sinks
                            .main
                            .error(format!("Error reading events: {}", e));
                        break Err(WatchError::Source(e));
                    }
                },
            }
        };

        ticker.abort();
        self.phase = Phase::ShuttingDown;
        exit
    }

    /// Parses and handles one line. Empty and malformed lines yield None.
    pub async fn handle_line(&self, line: &str) -> Option<Disposition> {
        self.handle_bytes(line.as_bytes()).await
    }

    /// Like [`handle_line`](Self::handle_line) for a line as read from a
    /// source, which need not be UTF-8.
    pub async fn handle_bytes(&self, line: &[u8]) -> Option<Disposition> {
        if line.iter().all(u8::is_ascii_whitespace) {
            return None;
        }

        match ChangeEvent::parse_bytes(line) {
            Ok(event) => Some(self.handle_event(event).await),
            Err(e) => {
                debug!("{}", e);
                self.sinks.main.warning(format!(
                    "Skipping malformed event line: {}",
                    String::from_utf8_lossy(line).trim()
                ));
                None
            }
        }
    }

    /// Routes one event: drop it, send it to the access log, or record it.
    pub async fn handle_event(&self, event: ChangeEvent) -> Disposition {
        match self.classifier.classify(&event) {
            Classification::Ignored => {
                debug!("Ignoring {}", event.describe());
                Disposition::Ignored
            }
            Classification::AccessOnly => {
                self.sinks
                    .access
                    .info(format!("File {} was accessed", event.path.display()));
                Disposition::Accessed
            }
            Classification::Relevant { vanished } => {
                if event.kind.is_delete() {
                    self.sinks.main.warning(format!(
                        "File {} was deleted - might be a dropped executable",
                        event.path.display()
                    ));
                } else if vanished {
                    self.sinks.main.warning(format!(
                        "File {} disappeared before it was recorded - might be a dropped executable",
                        event.path.display()
                    ));
                } else {
                    self.sinks.main.info(event.describe());
                }
                self.record(event).await
            }
        }
    }

    async fn record(&self, event: ChangeEvent) -> Disposition {
        let path = event.path.clone();
        match self.with_store(move |store| store.commit(&event)).await {
            Ok(Ok(outcome)) => Disposition::Committed(outcome),
            Ok(Err(StoreError::NotInitialized(git_dir))) => {
                error!(
                    "No history at {}, dropping event for {}",
                    git_dir.display(),
                    path.display()
                );
                self.sinks.main.error("Git repo does not exist");
                Disposition::Dropped
            }
            Ok(Err(StoreError::PathMissing(_))) => {
                debug!("{} is gone, nothing to record", path.display());
                Disposition::Failed
            }
            Ok(Err(e)) => {
                warn!("Could not record {}: {}", path.display(), e);
                Disposition::Failed
            }
            Err(e) => {
                error!("Commit task for {} failed: {}", path.display(), e);
                Disposition::Failed
            }
        }
    }

    /// Takes a backup right away, waiting for any commit in progress.
    pub async fn backup_now(&self) -> Result<BackupOutcome> {
        let outcome = self.with_store(|store| store.backup()).await??;
        Ok(outcome)
    }

    fn spawn_backup_ticker(&self) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let slot = self.backups.clone();
        let main = self.sinks.main.clone();
        let period = self.config.backup_interval;

        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                let claim = match slot.try_claim() {
                    Some(claim) => claim,
                    None => {
                        main.warning("Previous backup still running, skipping this one");
                        continue;
                    }
                };

                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let _claim = claim;
                    let mut guard = store.lock_owned().await;
                    match tokio::task::spawn_blocking(move || guard.backup()).await {
                        Ok(Ok(outcome)) => debug!("Scheduled backup: {:?}", outcome),
                        Ok(Err(e)) => warn!("Scheduled backup failed: {}", e),
                        Err(e) => error!("Backup task failed: {}", e),
                    }
                });
            }
        })
    }

    /// Waits for store work in flight, then flushes every sink.
    pub async fn shutdown(&mut self) {
        self.phase = Phase::ShuttingDown;
        drop(self.store.lock().await);
        self.sinks.main.info("Exiting");
        self.sinks.flush_all();
        self.phase = Phase::Terminated;
    }
}
