//! Resolved runtime configuration.
//!
//! All paths end up absolute. The watched directory is canonicalized so
//! the store identity derived from it is stable across runs.

use crate::error::{CoreError, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default directory for audit logs.
pub const DEFAULT_LOG_DIR: &str = "/var/log/windex";

/// Default root for revision stores and their backups.
pub const DEFAULT_BACKUP_DIR: &str = "/tmp/windex";

/// Backup interval in normal operation.
pub const BACKUP_INTERVAL: Duration = Duration::from_secs(3600);

/// Backup interval in debug mode.
pub const DEBUG_BACKUP_INTERVAL: Duration = Duration::from_secs(60);

/// Default debounce window for the audit logs.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

/// Unresolved options, as they come from flags or the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOptions {
    pub debug: bool,
    pub log_dir: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub access_log_file: Option<PathBuf>,
    pub git_log_file: Option<PathBuf>,
    pub backup_dir: Option<PathBuf>,
    pub debounce: Option<Duration>,
}

/// Fully resolved configuration for one watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    /// Canonical path of the directory under observation.
    pub watch_dir: PathBuf,

    /// Store identity: `<dir name>_<hash of canonical path>`.
    pub base_name: String,

    pub log_dir: PathBuf,
    pub main_log_file: PathBuf,
    pub access_log_file: PathBuf,
    pub git_log_file: PathBuf,

    /// Root under which every store and its backups live.
    pub backup_root: PathBuf,

    pub debug: bool,
    pub backup_interval: Duration,
    pub debounce: Duration,
}

impl WatchConfig {
    /// Resolves options against the current working directory.
    pub fn resolve(watch_dir: &Path, options: ConfigOptions) -> Result<Self> {
        let cwd = std::env::current_dir().map_err(|e| CoreError::io(".", e))?;
        Self::resolve_from(&cwd, watch_dir, options)
    }

    /// Resolves options against an explicit base directory.
    pub fn resolve_from(cwd: &Path, watch_dir: &Path, options: ConfigOptions) -> Result<Self> {
        let requested = absolutize(cwd, watch_dir)?;
        if !requested.exists() {
            return Err(CoreError::MissingWatchDir(requested));
        }
        if !requested.is_dir() {
            return Err(CoreError::NotADirectory(requested));
        }
        let watch_dir = requested
            .canonicalize()
            .map_err(|e| CoreError::io(&requested, e))?;

        let base_name = store_identity(&watch_dir);

        let log_dir = match options.log_dir {
            Some(dir) => absolutize(cwd, &dir)?,
            None => PathBuf::from(DEFAULT_LOG_DIR),
        };
        let log_path = |file: Option<PathBuf>, suffix: &str| -> Result<PathBuf> {
            match file {
                Some(file) => absolutize(cwd, &file),
                None => Ok(log_dir.join(format!("{}{}", base_name, suffix))),
            }
        };
        let main_log_file = log_path(options.log_file, ".log")?;
        let access_log_file = log_path(options.access_log_file, ".access.log")?;
        let git_log_file = log_path(options.git_log_file, ".git.log")?;

        let backup_root = match options.backup_dir {
            Some(dir) => absolutize(cwd, &dir)?,
            None => PathBuf::from(DEFAULT_BACKUP_DIR),
        };

        let backup_interval = if options.debug {
            DEBUG_BACKUP_INTERVAL
        } else {
            BACKUP_INTERVAL
        };

        Ok(Self {
            watch_dir,
            base_name,
            log_dir,
            main_log_file,
            access_log_file,
            git_log_file,
            backup_root,
            debug: options.debug,
            backup_interval,
            debounce: options.debounce.unwrap_or(DEFAULT_DEBOUNCE),
        })
    }

    /// Directory holding this watched directory's store and snapshots.
    pub fn store_dir(&self) -> PathBuf {
        self.backup_root.join(&self.base_name)
    }

    /// Key/value pairs for display.
    pub fn summary(&self) -> Vec<(&'static str, String)> {
        vec![
            ("WATCH_DIR", self.watch_dir.display().to_string()),
            ("BASE_NAME", self.base_name.clone()),
            ("LOG_DIR", self.log_dir.display().to_string()),
            ("LOG_FILE", self.main_log_file.display().to_string()),
            ("ACCESS_LOG_FILE", self.access_log_file.display().to_string()),
            ("GIT_LOG_FILE", self.git_log_file.display().to_string()),
            ("BACKUP_DIR", self.backup_root.display().to_string()),
            ("DEBUG", self.debug.to_string()),
            ("BACKUP_INTERVAL", format!("{}s", self.backup_interval.as_secs())),
            ("DEBOUNCE", format!("{}s", self.debounce.as_secs_f64())),
        ]
    }
}

/// Derives the store identity for a canonical directory path.
///
/// Same directory, same identity; two directories that share a name
/// still get different identities.
pub fn store_identity(canonical: &Path) -> String {
    let name = canonical
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "root".to_string());

    let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
    let hash = hex::encode(digest);

    format!("{}_{}", name, &hash[..32])
}

/// Expands a leading `~` to the home directory.
pub fn expand_tilde(path: &Path) -> Result<PathBuf> {
    let mut components = path.components();
    match components.next() {
        Some(std::path::Component::Normal(first)) if first == "~" => {
            let home = dirs::home_dir().ok_or(CoreError::MissingHome)?;
            Ok(home.join(components.as_path()))
        }
        _ => Ok(path.to_path_buf()),
    }
}

fn absolutize(cwd: &Path, path: &Path) -> Result<PathBuf> {
    let expanded = expand_tilde(path)?;
    if expanded.is_absolute() {
        Ok(expanded)
    } else {
        Ok(cwd.join(expanded))
    }
}
