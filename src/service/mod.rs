//! Service supervision over two environments.
//!
//! A service is either owned by systemd (`InitManaged`) or launched and
//! signalled by this tool directly (`Manual`). The environment is probed once
//! when a supervisor is created; callers only ever see the [`Supervisor`]
//! trait after that.

pub mod host;
pub mod manual;
pub mod systemd;
pub mod unit_file;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::config::Config;
use crate::retry::RetryPolicy;

pub use host::{Host, SystemHost};
pub use manual::ManualSupervisor;
pub use systemd::SystemdSupervisor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    InitManaged,
    Manual,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Environment::InitManaged => "systemd",
            Environment::Manual => "manual",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Unknown,
    Stopped,
    Starting,
    Ready,
    Failed,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ServiceState::Unknown => "unknown",
            ServiceState::Stopped => "stopped",
            ServiceState::Starting => "starting",
            ServiceState::Ready => "ready",
            ServiceState::Failed => "failed",
        })
    }
}

/// Static facts about one daemon.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    /// Process name as it appears in the process table.
    pub name: &'static str,
    pub unit: &'static str,
    pub program: PathBuf,
    pub log_path: PathBuf,
    /// Literal text the daemon logs once it is serving.
    pub ready_marker: &'static str,
    /// Arguments used on the manual path when nothing better is known.
    pub default_args: Vec<String>,
}

/// Retry budgets shared by both supervisor kinds.
#[derive(Debug, Clone, Copy)]
pub struct Budgets {
    pub ready: RetryPolicy,
    pub stop: RetryPolicy,
}

impl Budgets {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ready: config.ready_retry(),
            stop: config.stop_retry(),
        }
    }
}

/// Uniform lifecycle control for one daemon.
pub trait Supervisor: Send {
    fn descriptor(&self) -> &ServiceDescriptor;

    fn environment(&self) -> Environment;

    fn state(&self) -> ServiceState;

    /// Probe the live process state. Updates `state()` to `Ready` or `Stopped`.
    fn is_running(&mut self) -> Result<bool>;

    /// Arguments the daemon runs (or will next run) with, program excluded.
    fn launch_args(&self) -> Result<Vec<String>>;

    /// Replace the launch arguments. Takes effect on the next (re)start.
    /// Returns whether anything changed.
    fn set_launch_args(&mut self, args: Vec<String>) -> Result<bool>;

    /// Start and wait for readiness. A no-op when already starting or ready.
    fn start(&mut self) -> Result<()>;

    /// Stop and wait until the process is gone.
    fn stop(&mut self) -> Result<()>;

    /// Stop then start with the current launch arguments.
    fn restart(&mut self) -> Result<()>;

    /// Ask the running daemon to re-read its configuration.
    fn reload(&mut self) -> Result<()>;
}

/// Find a unit file in the first directory that has it.
pub fn find_unit_file(unit: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter().map(|d| d.join(unit)).find(|p| p.is_file())
}

/// systemd counts as the init when its runtime directory exists and
/// `systemctl` is installed.
pub fn init_system_running(marker: &Path) -> bool {
    marker.is_dir() && which::which("systemctl").is_ok()
}

/// Decide who manages a service.
pub fn probe(init_running: bool, unit_file: Option<&Path>) -> Environment {
    match (init_running, unit_file) {
        (true, Some(_)) => Environment::InitManaged,
        _ => Environment::Manual,
    }
}

/// Probe the environment for `desc` and build the matching supervisor.
pub fn create_supervisor(
    desc: ServiceDescriptor,
    config: &Config,
    host: Arc<dyn Host>,
) -> Box<dyn Supervisor> {
    let budgets = Budgets::from_config(config);
    let unit_file = find_unit_file(desc.unit, &config.unit_dirs());
    let environment = probe(init_system_running(&config.init_marker()), unit_file.as_deref());
    debug!(service = desc.name, %environment, unit_file = ?unit_file, "service:probed");

    match (environment, unit_file) {
        (Environment::InitManaged, Some(path)) => {
            Box::new(SystemdSupervisor::new(desc, path, host, budgets))
        }
        _ => Box::new(ManualSupervisor::new(desc, host, budgets)),
    }
}

/// Last `max_lines` lines of a log, for error diagnostics.
pub fn log_tail(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}
