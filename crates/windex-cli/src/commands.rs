//! CLI command implementations.

use crate::Settings;
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use windex_core::WatchConfig;
use windex_store::{GitCli, StoreLayout};
use windex_watcher::audit::AUDIT_KEY;
use windex_watcher::{
    is_privileged, EventSource, LoopExit, SessionOptions, WatchError, WatchSession,
};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Watch a directory until interrupted.
pub async fn watch(directory: &Path, settings: &Settings, options: SessionOptions) -> Result<()> {
    if !is_privileged() {
        return Err(WatchError::Privilege.into());
    }

    let config = WatchConfig::resolve(directory, settings.options())?;
    let mut session = WatchSession::open(config, options)?;
    session.sinks().main.info(format!(
        "Starting windex on directory: {}",
        session.config().watch_dir.display()
    ));

    let outcome = drive(&mut session, options).await;

    // Every exit path flushes the logs.
    session.shutdown().await;
    outcome
}

async fn drive(session: &mut WatchSession<GitCli>, options: SessionOptions) -> Result<()> {
    session.check_dependencies().await?;
    session.prepare_store().await?;

    print_banner(session.config());
    print_config(session.config());

    let mut source = EventSource::open(options.backend, &session.config().watch_dir)?;
    match session.run(&mut source, shutdown_signal()).await? {
        LoopExit::Interrupted => info!("Exiting"),
        LoopExit::SourceClosed => warn!("Event source closed, stopping"),
    }
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Print the resolved configuration.
pub fn config(directory: &Path, settings: &Settings, json: bool) -> Result<()> {
    let config = WatchConfig::resolve(directory, settings.options())?;

    if json {
        let map: serde_json::Map<String, serde_json::Value> = config
            .summary()
            .into_iter()
            .map(|(key, value)| (key.to_lowercase(), serde_json::Value::String(value)))
            .collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
    } else {
        print_config(&config);
    }
    Ok(())
}

/// Remove everything windex keeps for a directory.
pub fn clean(directory: &Path, settings: &Settings, yes: bool) -> Result<()> {
    let config = WatchConfig::resolve(directory, settings.options())?;
    let targets = clean_targets(&config);

    if targets.is_empty() {
        println!("{} Nothing to clean for {}", "✓".green(), config.watch_dir.display());
        return Ok(());
    }

    if !yes {
        println!("{}", "Would remove:".yellow());
        for target in &targets {
            println!("  {}", target.display());
        }
        println!("  Run again with {} to delete", "--yes".cyan());
        return Ok(());
    }

    for target in &targets {
        if target.is_dir() {
            fs::remove_dir_all(target)?;
        } else {
            fs::remove_file(target)?;
        }
        println!("{} Removed {}", "✓".green(), target.display());
    }
    Ok(())
}

/// Paths `clean` removes, limited to those that exist.
///
/// The `.git` entry in the watched directory is only ours if it is a
/// link file; a real repository there is left alone.
fn clean_targets(config: &WatchConfig) -> Vec<PathBuf> {
    let layout = StoreLayout::new(&config.watch_dir, config.store_dir());
    let mut targets = Vec::new();

    let link = layout.git_link();
    if link.is_file() {
        targets.push(link);
    }
    if layout.root.is_dir() {
        targets.push(layout.root.clone());
    }
    for log in [
        &config.main_log_file,
        &config.access_log_file,
        &config.git_log_file,
    ] {
        if log.is_file() {
            targets.push(log.clone());
        }
    }
    targets
}

fn print_banner(config: &WatchConfig) {
    let dir = config.watch_dir.display();
    println!();
    println!("{}", "  Useful commands".cyan().bold());
    println!("  {}", "-".repeat(48).dimmed());
    println!("  git -C {} log", dir);
    println!("  git -C {} status", dir);
    println!("  git -C {} reset --hard <commit>", dir);
    println!("  {}", "-".repeat(48).dimmed());
    println!("  ausearch -k {}", AUDIT_KEY);
    println!("  aureport -k");
    println!("  auditctl -l");
    println!();
}

fn print_config(config: &WatchConfig) {
    println!("{}", "Configuration".cyan().bold());
    for (key, value) in config.summary() {
        println!("  {:<16} {}", key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use windex_core::ConfigOptions;

    #[test]
    fn test_clean_targets_only_list_our_files() {
        let dir = tempdir().unwrap();
        let watch = dir.path().join("project");
        fs::create_dir(&watch).unwrap();

        let config = WatchConfig::resolve(
            &watch,
            ConfigOptions {
                log_dir: Some(dir.path().join("logs")),
                backup_dir: Some(dir.path().join("backups")),
                ..ConfigOptions::default()
            },
        )
        .unwrap();
        assert!(clean_targets(&config).is_empty());

        fs::create_dir_all(config.store_dir().join("current.git")).unwrap();
        fs::write(config.watch_dir.join(".git"), "gitdir: elsewhere\n").unwrap();
        fs::create_dir_all(&config.log_dir).unwrap();
        fs::write(&config.main_log_file, "line\n").unwrap();

        let targets = clean_targets(&config);
        assert_eq!(
            targets,
            vec![
                config.watch_dir.join(".git"),
                config.store_dir(),
                config.main_log_file.clone(),
            ]
        );
    }

    #[test]
    fn test_clean_leaves_a_real_repository_alone() {
        let dir = tempdir().unwrap();
        let watch = dir.path().join("project");
        fs::create_dir_all(watch.join(".git")).unwrap();

        let config = WatchConfig::resolve(
            &watch,
            ConfigOptions {
                log_dir: Some(dir.path().join("logs")),
                backup_dir: Some(dir.path().join("backups")),
                ..ConfigOptions::default()
            },
        )
        .unwrap();
        assert!(clean_targets(&config).is_empty());
    }
}
