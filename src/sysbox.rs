//! The sysbox worker daemons: sysbox-mgr and sysbox-fs.
//!
//! sysbox-fs connects to sysbox-mgr at startup, so the manager always starts
//! first and stops last. Each start is gated on that daemon's readiness
//! before the next step runs.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::service::{Environment, Host, ServiceDescriptor, ServiceState, Supervisor, create_supervisor};

/// Both daemons log this once they are serving.
pub const READY_MARKER: &str = "Ready";

pub fn mgr_descriptor(config: &Config) -> ServiceDescriptor {
    ServiceDescriptor {
        name: "sysbox-mgr",
        unit: "sysbox-mgr.service",
        program: config.programs.sysbox_mgr(),
        log_path: config.log_dir().join("sysbox-mgr.log"),
        ready_marker: READY_MARKER,
        default_args: Vec::new(),
    }
}

pub fn fs_descriptor(config: &Config) -> ServiceDescriptor {
    ServiceDescriptor {
        name: "sysbox-fs",
        unit: "sysbox-fs.service",
        program: config.programs.sysbox_fs(),
        log_path: config.log_dir().join("sysbox-fs.log"),
        ready_marker: READY_MARKER,
        default_args: Vec::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonStatus {
    pub name: &'static str,
    pub environment: Environment,
    pub state: ServiceState,
}

/// The pair of worker daemons, manager first.
pub struct Workers {
    mgr: Box<dyn Supervisor>,
    fs: Box<dyn Supervisor>,
}

impl Workers {
    pub fn new(mgr: Box<dyn Supervisor>, fs: Box<dyn Supervisor>) -> Self {
        Self { mgr, fs }
    }

    /// Probe each daemon's environment and build its supervisor.
    pub fn detect(config: &Config, host: Arc<dyn Host>) -> Self {
        let mgr = create_supervisor(mgr_descriptor(config), config, Arc::clone(&host));
        let fs = create_supervisor(fs_descriptor(config), config, host);
        Self::new(mgr, fs)
    }

    /// Merge extra arguments into each daemon's launch line; see [`merge_args`].
    /// Returns whether either launch line changed.
    pub fn add_args(&mut self, mgr_args: &[String], fs_args: &[String]) -> Result<bool> {
        let mgr_changed = add_missing_args(self.mgr.as_mut(), mgr_args)?;
        let fs_changed = add_missing_args(self.fs.as_mut(), fs_args)?;
        Ok(mgr_changed || fs_changed)
    }

    pub fn start(&mut self) -> Result<()> {
        self.mgr.start().context("Failed to start sysbox-mgr")?;
        self.fs.start().context("Failed to start sysbox-fs")?;
        info!("sysbox:started");
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        self.fs.stop().context("Failed to stop sysbox-fs")?;
        self.mgr.stop().context("Failed to stop sysbox-mgr")?;
        info!("sysbox:stopped");
        Ok(())
    }

    /// Stop both, then start both, preserving each daemon's launch arguments.
    pub fn restart(&mut self) -> Result<()> {
        let mgr_args = self.mgr.launch_args()?;
        let fs_args = self.fs.launch_args()?;
        self.stop()?;
        self.mgr.set_launch_args(mgr_args)?;
        self.fs.set_launch_args(fs_args)?;
        self.start()
    }

    pub fn status(&mut self) -> Result<Vec<DaemonStatus>> {
        let mut out = Vec::with_capacity(2);
        for sup in [self.mgr.as_mut(), self.fs.as_mut()] {
            sup.is_running()?;
            out.push(DaemonStatus {
                name: sup.descriptor().name,
                environment: sup.environment(),
                state: sup.state(),
            });
        }
        Ok(out)
    }
}

fn add_missing_args(sup: &mut dyn Supervisor, extra: &[String]) -> Result<bool> {
    if extra.is_empty() {
        return Ok(false);
    }
    let args = merge_args(&sup.launch_args()?, extra);
    sup.set_launch_args(args)
}

/// One option on a launch line: its flag name and the tokens that spell it.
struct LaunchOption {
    name: String,
    tokens: Vec<String>,
}

/// Split a launch line into options. `--flag=value` is one option, and so is
/// `--flag value` when the next token does not start with `-`.
fn group_options(args: &[String]) -> Vec<LaunchOption> {
    let mut out = Vec::new();
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        if !arg.starts_with('-') {
            out.push(LaunchOption {
                name: arg.clone(),
                tokens: vec![arg.clone()],
            });
            continue;
        }
        if let Some((name, _)) = arg.split_once('=') {
            out.push(LaunchOption {
                name: name.to_string(),
                tokens: vec![arg.clone()],
            });
            continue;
        }
        let mut tokens = vec![arg.clone()];
        if let Some(value) = iter.next_if(|v| !v.starts_with('-')) {
            tokens.push(value.clone());
        }
        out.push(LaunchOption {
            name: arg.clone(),
            tokens,
        });
    }
    out
}

/// Merge `extra` into `current`. An option whose flag is already present
/// replaces it in place, value included; anything else is appended.
fn merge_args(current: &[String], extra: &[String]) -> Vec<String> {
    let mut options = group_options(current);
    for option in group_options(extra) {
        match options.iter_mut().find(|o| o.name == option.name) {
            Some(existing) => *existing = option,
            None => options.push(option),
        }
    }
    options.into_iter().flat_map(|o| o.tokens).collect()
}
