//! Host package and service management.
//!
//! Installing a tool or restarting a service means shelling out to
//! whatever manager the host has. Each operation walks an ordered list
//! of managers and uses the first one present.

use std::io;
use std::process::Command;
use tracing::{debug, info, warn};

/// Runs host commands. Swapped for a recording runner in tests.
pub trait CommandRunner: Send + Sync {
    /// True if `program` can be found on the search path.
    fn exists(&self, program: &str) -> bool;

    /// Runs `program` to completion. `Ok(true)` on a zero exit status.
    fn run(&self, program: &str, args: &[&str]) -> io::Result<bool>;
}

/// Runner for the real host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn exists(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }

    fn run(&self, program: &str, args: &[&str]) -> io::Result<bool> {
        debug!("Running {} {:?}", program, args);
        let output = Command::new(program).args(args).output()?;
        if !output.status.success() {
            debug!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(output.status.success())
    }
}

/// True if the process runs with root privileges.
pub fn is_privileged() -> bool {
    nix::unistd::Uid::effective().is_root()
}

/// Package managers tried by [`Platform::install`], in order, with the
/// arguments placed before the package name.
const INSTALLERS: &[(&str, &[&str])] = &[
    ("brew", &["install"]),
    ("apt", &["install", "-y"]),
    ("apt-get", &["install", "-y"]),
    ("yum", &["install", "-y"]),
    ("dnf", &["install", "-y"]),
    ("zypper", &["--non-interactive", "install"]),
    ("pacman", &["-S", "--noconfirm"]),
    ("apk", &["add"]),
    ("emerge", &["--ask=n"]),
];

/// Service managers tried by [`Platform::restart_service`], in order.
const SERVICE_MANAGERS: &[&str] = &[
    "systemctl",
    "service",
    "initctl",
    "rc-service",
    "sv",
    "openrc-service",
    "launchctl",
    "rcctl",
    "s6-svc",
    "supervisorctl",
];

/// Package and service operations on top of a [`CommandRunner`].
#[derive(Debug, Clone)]
pub struct Platform<R = SystemRunner> {
    runner: R,
    debug: bool,
}

impl Platform<SystemRunner> {
    /// Platform for the real host. In debug mode installs and restarts
    /// only log.
    pub fn system(debug: bool) -> Self {
        Self::new(SystemRunner, debug)
    }
}

impl<R: CommandRunner> Platform<R> {
    pub fn new(runner: R, debug: bool) -> Self {
        Self { runner, debug }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn command_exists(&self, name: &str) -> bool {
        self.runner.exists(name)
    }

    /// Runs a command, treating a failure to start as failure.
    pub fn run(&self, program: &str, args: &[&str]) -> bool {
        match self.runner.run(program, args) {
            Ok(success) => success,
            Err(e) => {
                warn!("Failed to run {}: {}", program, e);
                false
            }
        }
    }

    /// Installs `package` with the first package manager present.
    pub fn install(&self, package: &str) -> bool {
        if self.debug {
            info!("Debug mode: not installing {}", package);
            return true;
        }

        for (manager, args) in INSTALLERS {
            if !self.runner.exists(manager) {
                continue;
            }
            info!("Installing {} with {}", package, manager);
            let mut full: Vec<&str> = args.to_vec();
            full.push(package);
            return self.run(manager, &full);
        }

        warn!("No supported package manager found to install {}", package);
        false
    }

    /// Restarts `service` with the first service manager present.
    pub fn restart_service(&self, service: &str) -> bool {
        if self.debug {
            info!("Debug mode: not restarting {}", service);
            return true;
        }

        for manager in SERVICE_MANAGERS {
            if !self.runner.exists(manager) {
                continue;
            }
            info!("Restarting {} with {}", service, manager);
            return match *manager {
                "launchctl" => {
                    self.run(manager, &["stop", service]) && self.run(manager, &["start", service])
                }
                "s6-svc" => {
                    let dir = format!("/run/s6/services/{}", service);
                    self.run(manager, &["-r", dir.as_str()])
                }
                "systemctl" | "initctl" | "rcctl" | "supervisorctl" | "sv" => {
                    self.run(manager, &["restart", service])
                }
                _ => self.run(manager, &[service, "restart"]),
            };
        }

        warn!("No supported service manager found to restart {}", service);
        false
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::CommandRunner;
    use std::collections::HashSet;
    use std::io;
    use std::sync::{Arc, Mutex};

    /// Runner that knows a fixed set of programs and records every call.
    #[derive(Debug, Default, Clone)]
    pub(crate) struct FakeRunner {
        available: HashSet<String>,
        failing: HashSet<String>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl FakeRunner {
        pub(crate) fn with(programs: &[&str]) -> Self {
            Self {
                available: programs.iter().map(|p| p.to_string()).collect(),
                ..Self::default()
            }
        }

        /// Makes any command line starting with `prefix` fail.
        pub(crate) fn failing(mut self, prefix: &str) -> Self {
            self.failing.insert(prefix.to_string());
            self
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandRunner for FakeRunner {
        fn exists(&self, program: &str) -> bool {
            self.available.contains(program)
        }

        fn run(&self, program: &str, args: &[&str]) -> io::Result<bool> {
            let line = std::iter::once(program)
                .chain(args.iter().copied())
                .collect::<Vec<_>>()
                .join(" ");
            let fails = self.failing.iter().any(|prefix| line.starts_with(prefix.as_str()));
            self.calls.lock().unwrap().push(line);
            Ok(!fails)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeRunner;
    use super::*;

    #[test]
    fn test_install_uses_first_available_manager() {
        let platform = Platform::new(FakeRunner::with(&["yum", "pacman"]), false);
        assert!(platform.install("inotify-tools"));
        assert_eq!(platform.runner().calls(), vec!["yum install -y inotify-tools"]);
    }

    #[test]
    fn test_install_reports_manager_failure() {
        let runner = FakeRunner::with(&["apt"]).failing("apt install");
        let platform = Platform::new(runner, false);
        assert!(!platform.install("git"));
    }

    #[test]
    fn test_install_without_manager_fails() {
        let platform = Platform::new(FakeRunner::with(&[]), false);
        assert!(!platform.install("git"));
        assert!(platform.runner().calls().is_empty());
    }

    #[test]
    fn test_debug_mode_skips_installs_and_restarts() {
        let platform = Platform::new(FakeRunner::with(&["apt", "systemctl"]), true);
        assert!(platform.install("auditd"));
        assert!(platform.restart_service("auditd"));
        assert!(platform.runner().calls().is_empty());
    }

    #[test]
    fn test_restart_service_command_shapes() {
        let cases = [
            ("systemctl", vec!["systemctl restart auditd"]),
            ("service", vec!["service auditd restart"]),
            ("rc-service", vec!["rc-service auditd restart"]),
            ("launchctl", vec!["launchctl stop auditd", "launchctl start auditd"]),
            ("s6-svc", vec!["s6-svc -r /run/s6/services/auditd"]),
        ];
        for (manager, expected) in cases {
            let platform = Platform::new(FakeRunner::with(&[manager]), false);
            assert!(platform.restart_service("auditd"), "{}", manager);
            assert_eq!(platform.runner().calls(), expected);
        }
    }

    #[test]
    fn test_restart_prefers_earlier_manager() {
        let platform = Platform::new(FakeRunner::with(&["supervisorctl", "systemctl"]), false);
        assert!(platform.restart_service("auditd"));
        assert_eq!(platform.runner().calls(), vec!["systemctl restart auditd"]);
    }

    #[test]
    fn test_system_runner_lookup() {
        let runner = SystemRunner;
        assert!(!runner.exists("definitely-not-a-real-program-windex"));
    }
}
