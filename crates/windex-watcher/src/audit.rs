//! Kernel audit rule for the watched directory.
//!
//! The revision history says what changed; the audit log says who did
//! it. Records are tagged with [`AUDIT_KEY`] so `ausearch -k` finds them.

use crate::error::{Result, WatchError};
use crate::platform::{CommandRunner, Platform};
use std::path::Path;
use tracing::{info, warn};

/// Key attached to every audit record produced by the rule.
pub const AUDIT_KEY: &str = "watchdir-script";

pub const AUDITCTL: &str = "auditctl";

/// Registers a watch rule on `dir` and restarts the audit daemon.
///
/// Tries a file watch first and falls back to a syscall rule filtered on
/// the directory. A failed daemon restart is only a warning.
pub fn register_watch_rule<R: CommandRunner>(platform: &Platform<R>, dir: &Path) -> Result<()> {
    if !platform.command_exists(AUDITCTL) {
        return Err(WatchError::Dependency {
            tool: AUDITCTL.to_string(),
        });
    }

    let dir_arg = dir.to_string_lossy().into_owned();
    let watched = platform.run(AUDITCTL, &["-w", dir_arg.as_str(), "-k", AUDIT_KEY]);

    if !watched {
        warn!("auditctl -w failed for {}, trying a syscall rule", dir.display());
        let filter = format!("dir={}", dir_arg);
        let ruled = platform.run(
            AUDITCTL,
            &["-a", "always,exit", "-F", filter.as_str(), "-F", "perm=war", "-k", AUDIT_KEY],
        );
        if !ruled {
            return Err(WatchError::Audit(dir.to_path_buf()));
        }
    }

    info!("Audit rule registered for {} with key {}", dir.display(), AUDIT_KEY);

    if !platform.restart_service("auditd") {
        warn!("Could not restart auditd; the rule applies once it restarts");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakeRunner;

    #[test]
    fn test_watch_rule_then_restart() {
        let platform = Platform::new(FakeRunner::with(&["auditctl", "systemctl"]), false);
        register_watch_rule(&platform, Path::new("/data/project")).unwrap();
        assert_eq!(
            platform.runner().calls(),
            vec![
                "auditctl -w /data/project -k watchdir-script",
                "systemctl restart auditd",
            ]
        );
    }

    #[test]
    fn test_falls_back_to_syscall_rule() {
        let runner = FakeRunner::with(&["auditctl"]).failing("auditctl -w");
        let platform = Platform::new(runner, false);
        register_watch_rule(&platform, Path::new("/data/project")).unwrap();
        assert_eq!(
            platform.runner().calls()[1],
            "auditctl -a always,exit -F dir=/data/project -F perm=war -k watchdir-script"
        );
    }

    #[test]
    fn test_both_rules_failing_is_an_error() {
        let runner = FakeRunner::with(&["auditctl"]).failing("auditctl");
        let platform = Platform::new(runner, false);
        assert!(matches!(
            register_watch_rule(&platform, Path::new("/data/project")),
            Err(WatchError::Audit(_))
        ));
    }

    #[test]
    fn test_missing_auditctl_is_a_dependency_error() {
        let platform = Platform::new(FakeRunner::with(&[]), false);
        assert!(matches!(
            register_watch_rule(&platform, Path::new("/data/project")),
            Err(WatchError::Dependency { .. })
        ));
    }
}
