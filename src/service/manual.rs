//! Supervision of daemons this tool launches itself.
//!
//! Start forks the program with its output sent to a log file and waits for
//! the readiness marker to show up there. Stop sends SIGTERM and waits for
//! the process to leave the process table.

use std::fs;
use std::sync::Arc;

use anyhow::Result;
use nix::sys::signal::Signal;
use tracing::{debug, info, warn};

use super::{Budgets, Environment, Host, ServiceDescriptor, ServiceState, Supervisor};
use crate::error::Error;
use crate::retry::{retry, retry_until};

pub struct ManualSupervisor {
    desc: ServiceDescriptor,
    host: Arc<dyn Host>,
    budgets: Budgets,
    state: ServiceState,
    /// Arguments for the next launch, once decided.
    args: Option<Vec<String>>,
}

impl ManualSupervisor {
    pub fn new(desc: ServiceDescriptor, host: Arc<dyn Host>, budgets: Budgets) -> Self {
        Self {
            desc,
            host,
            budgets,
            state: ServiceState::Unknown,
            args: None,
        }
    }

    /// Arguments of the running process, argv[0] dropped.
    fn running_args(&self) -> Result<Option<Vec<String>>> {
        let Some(pid) = self.host.pids_of(self.desc.name)?.first().copied() else {
            return Ok(None);
        };
        let argv = self.host.cmdline(pid)?;
        Ok(Some(argv.into_iter().skip(1).collect()))
    }

    fn wait_ready(&mut self) -> Result<()> {
        let log_path = self.desc.log_path.clone();
        let marker = self.desc.ready_marker;

        let waited = retry(self.budgets.ready, |attempt| {
            let log = fs::read_to_string(&log_path).unwrap_or_default();
            if log.contains(marker) {
                Ok(())
            } else {
                debug!(attempt, marker, "manual:not ready yet");
                Err(format!("'{marker}' not found in {}", log_path.display()))
            }
        });

        match waited {
            Ok(()) => {
                self.state = ServiceState::Ready;
                info!(service = self.desc.name, "manual:ready");
                Ok(())
            }
            Err(e) => {
                self.state = ServiceState::Failed;
                let log = fs::read_to_string(&log_path)
                    .unwrap_or_else(|err| format!("(could not read {}: {err})", log_path.display()));
                Err(Error::Transition {
                    service: self.desc.name.to_string(),
                    expected: "ready",
                    attempts: e.attempts,
                    diagnostic: format!("{}\n--- {} ---\n{}", e.last, log_path.display(), log),
                }
                .into())
            }
        }
    }
}

impl Supervisor for ManualSupervisor {
    fn descriptor(&self) -> &ServiceDescriptor {
        &self.desc
    }

    fn environment(&self) -> Environment {
        Environment::Manual
    }

    fn state(&self) -> ServiceState {
        self.state
    }

    fn is_running(&mut self) -> Result<bool> {
        let running = !self.host.pids_of(self.desc.name)?.is_empty();
        self.state = if running {
            ServiceState::Ready
        } else {
            ServiceState::Stopped
        };
        Ok(running)
    }

    fn launch_args(&self) -> Result<Vec<String>> {
        if let Some(args) = &self.args {
            return Ok(args.clone());
        }
        Ok(self
            .running_args()?
            .unwrap_or_else(|| self.desc.default_args.clone()))
    }

    fn set_launch_args(&mut self, args: Vec<String>) -> Result<bool> {
        let changed = self.launch_args()? != args;
        self.args = Some(args);
        Ok(changed)
    }

    fn start(&mut self) -> Result<()> {
        if matches!(self.state, ServiceState::Starting | ServiceState::Ready) {
            debug!(service = self.desc.name, state = ?self.state, "manual:start skipped");
            return Ok(());
        }
        if !self.host.pids_of(self.desc.name)?.is_empty() {
            debug!(service = self.desc.name, "manual:already running");
            self.state = ServiceState::Ready;
            return Ok(());
        }

        let args = self.launch_args()?;
        self.state = ServiceState::Starting;
        info!(service = self.desc.name, ?args, log = %self.desc.log_path.display(), "manual:starting");

        if let Err(e) = self
            .host
            .spawn(&self.desc.program, &args, &self.desc.log_path)
        {
            self.state = ServiceState::Failed;
            return Err(Error::Transition {
                service: self.desc.name.to_string(),
                expected: "ready",
                attempts: 0,
                diagnostic: format!("{e:#}"),
            }
            .into());
        }

        self.wait_ready()
    }

    fn stop(&mut self) -> Result<()> {
        let pids = self.host.pids_of(self.desc.name)?;
        if pids.is_empty() {
            self.state = ServiceState::Stopped;
            return Ok(());
        }

        info!(service = self.desc.name, ?pids, "manual:stopping");
        for pid in &pids {
            self.host.signal(*pid, Signal::SIGTERM)?;
        }

        let host = Arc::clone(&self.host);
        let name = self.desc.name;
        let waited = retry_until(self.budgets.stop, || {
            host.pids_of(name).map(|p| p.is_empty()).unwrap_or(false)
        });

        match waited {
            Ok(()) => {
                self.state = ServiceState::Stopped;
                Ok(())
            }
            Err(e) => {
                self.state = ServiceState::Failed;
                let remaining = self.host.pids_of(name).unwrap_or_default();
                Err(Error::Transition {
                    service: name.to_string(),
                    expected: "stopped",
                    attempts: e.attempts,
                    diagnostic: format!("still running as pid(s) {remaining:?}"),
                }
                .into())
            }
        }
    }

    fn restart(&mut self) -> Result<()> {
        // Relaunch with what the process was running with, unless already decided.
        let args = self.launch_args()?;
        self.stop()?;
        self.args = Some(args);
        self.start()
    }

    fn reload(&mut self) -> Result<()> {
        let pids = self.host.pids_of(self.desc.name)?;
        if pids.is_empty() {
            warn!(service = self.desc.name, "manual:reload requested but not running");
            return Ok(());
        }
        for pid in pids {
            self.host.signal(pid, Signal::SIGHUP)?;
        }
        info!(service = self.desc.name, "manual:reloaded");
        Ok(())
    }
}
