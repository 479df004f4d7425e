//! Windex CLI - continuous filesystem change auditor
//!
//! Watches a directory, records every change into a versioned history
//! kept outside the directory, and writes audit logs of what happened.

use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use windex_core::ConfigOptions;
use windex_watcher::{EventBackend, SessionOptions};

mod commands;

#[derive(Parser)]
#[command(name = "windex")]
#[command(author = "Windex Contributors")]
#[command(version)]
#[command(about = "Continuous filesystem change auditor", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command; each can also come from the environment.
#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// Back up every minute and never install packages
    #[arg(long, global = true, env = "DEBUG")]
    pub debug: bool,

    /// Directory for log files
    #[arg(long, global = true, env = "LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Main log file (defaults to <log-dir>/<name>.log)
    #[arg(long, global = true, env = "LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Access log file (defaults to <log-dir>/<name>.access.log)
    #[arg(long, global = true, env = "ACCESS_LOG_FILE")]
    pub access_log_file: Option<PathBuf>,

    /// History log file (defaults to <log-dir>/<name>.git.log)
    #[arg(long, global = true, env = "GIT_LOG_FILE")]
    pub git_log_file: Option<PathBuf>,

    /// Root directory for histories and backups
    #[arg(long, global = true, env = "BACKUP_DIR")]
    pub backup_dir: Option<PathBuf>,

    /// Seconds of silence before a repeated log line is written
    #[arg(long, global = true, env = "DEBOUNCE_SECS")]
    pub debounce_secs: Option<u64>,
}

impl Settings {
    pub fn options(&self) -> ConfigOptions {
        ConfigOptions {
            debug: self.debug,
            log_dir: self.log_dir.clone(),
            log_file: self.log_file.clone(),
            access_log_file: self.access_log_file.clone(),
            git_log_file: self.git_log_file.clone(),
            backup_dir: self.backup_dir.clone(),
            debounce: self.debounce_secs.map(Duration::from_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    /// inotifywait child process
    Inotify,
    /// Built-in watcher
    Notify,
}

impl From<BackendArg> for EventBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Inotify => EventBackend::Inotify,
            BackendArg::Notify => EventBackend::Notify,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a directory and record every change
    Watch {
        /// Directory to watch
        directory: PathBuf,

        /// Where change events come from
        #[arg(long, value_enum, default_value_t = BackendArg::Inotify)]
        backend: BackendArg,

        /// Also register a kernel audit rule on the directory
        #[arg(long)]
        audit: bool,
    },

    /// Print the resolved configuration
    Config {
        /// Watched directory
        directory: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove the history, backups and logs of a directory
    Clean {
        /// Watched directory
        directory: PathBuf,

        /// Actually delete; without this only list what would go
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Set up logging
    let default_filter = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(filter)
        .init();

    let result = match cli.command {
        Commands::Watch {
            directory,
            backend,
            audit,
        } => {
            let options = SessionOptions {
                backend: backend.into(),
                audit,
            };
            commands::watch(&directory, &cli.settings, options).await
        }
        Commands::Config { directory, json } => commands::config(&directory, &cli.settings, json),
        Commands::Clean { directory, yes } => commands::clean(&directory, &cli.settings, yes),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}
