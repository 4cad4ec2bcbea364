//! Supervision of units owned by systemd.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use super::{Budgets, Environment, Host, ServiceDescriptor, ServiceState, Supervisor, log_tail, unit_file};
use crate::error::Error;
use crate::retry::retry_until;

const JOURNAL_LINES: usize = 50;

pub struct SystemdSupervisor {
    desc: ServiceDescriptor,
    unit_path: PathBuf,
    host: Arc<dyn Host>,
    budgets: Budgets,
    state: ServiceState,
}

impl SystemdSupervisor {
    pub fn new(
        desc: ServiceDescriptor,
        unit_path: PathBuf,
        host: Arc<dyn Host>,
        budgets: Budgets,
    ) -> Self {
        Self {
            desc,
            unit_path,
            host,
            budgets,
            state: ServiceState::Unknown,
        }
    }

    fn systemctl(&self, args: &[&str]) -> Result<String> {
        self.host.run("systemctl", args)
    }

    fn is_active(&self) -> Result<bool> {
        self.host
            .check("systemctl", &["is-active", "--quiet", self.desc.unit])
    }

    fn diagnostic(&self) -> String {
        let journal = self
            .host
            .run("journalctl", &["-u", self.desc.unit, "--no-pager", "-n", "200"]);
        match journal {
            Ok(text) if !text.trim().is_empty() => log_tail(&text, JOURNAL_LINES),
            Ok(_) => "(journal is empty)".to_string(),
            Err(e) => format!("(journal unavailable: {e:#})"),
        }
    }

    /// Mark the unit failed and build the error for a step that did not succeed.
    fn fail(&mut self, expected: &'static str, attempts: u32, cause: String) -> anyhow::Error {
        self.state = ServiceState::Failed;
        let diagnostic = format!("{cause}\n{}", self.diagnostic());
        Error::Transition {
            service: self.desc.unit.to_string(),
            expected,
            attempts,
            diagnostic,
        }
        .into()
    }

    /// daemon-reload, then `verb` the unit, then wait for it to turn active.
    fn activate(&mut self, verb: &str) -> Result<()> {
        self.state = ServiceState::Starting;
        info!(unit = self.desc.unit, verb, "systemd:activating");

        if let Err(e) = self.systemctl(&["daemon-reload"]) {
            return Err(self.fail("ready", 1, format!("{e:#}")));
        }
        if let Err(e) = self.systemctl(&[verb, self.desc.unit]) {
            return Err(self.fail("ready", 1, format!("{e:#}")));
        }

        let host = Arc::clone(&self.host);
        let unit = self.desc.unit;
        let waited = retry_until(self.budgets.ready, || {
            host.check("systemctl", &["is-active", "--quiet", unit])
                .unwrap_or(false)
        });
        match waited {
            Ok(()) => {
                self.state = ServiceState::Ready;
                info!(unit, "systemd:ready");
                Ok(())
            }
            Err(e) => Err(self.fail("ready", e.attempts, format!("{unit} is not active"))),
        }
    }
}

impl Supervisor for SystemdSupervisor {
    fn descriptor(&self) -> &ServiceDescriptor {
        &self.desc
    }

    fn environment(&self) -> Environment {
        Environment::InitManaged
    }

    fn state(&self) -> ServiceState {
        self.state
    }

    fn is_running(&mut self) -> Result<bool> {
        let active = self.is_active()?;
        self.state = if active {
            ServiceState::Ready
        } else {
            ServiceState::Stopped
        };
        Ok(active)
    }

    fn launch_args(&self) -> Result<Vec<String>> {
        unit_file::read_args(&self.unit_path)
    }

    fn set_launch_args(&mut self, args: Vec<String>) -> Result<bool> {
        let changed = unit_file::write_args(&self.unit_path, &args)?;
        if changed {
            info!(unit_file = %self.unit_path.display(), ?args, "systemd:unit rewritten");
            // systemd keeps serving the old definition until told otherwise.
            self.systemctl(&["daemon-reload"])?;
        }
        Ok(changed)
    }

    fn start(&mut self) -> Result<()> {
        if matches!(self.state, ServiceState::Starting | ServiceState::Ready) {
            debug!(unit = self.desc.unit, state = ?self.state, "systemd:start skipped");
            return Ok(());
        }
        self.activate("start")
    }

    fn stop(&mut self) -> Result<()> {
        info!(unit = self.desc.unit, "systemd:stopping");
        if let Err(e) = self.systemctl(&["stop", self.desc.unit]) {
            return Err(self.fail("stopped", 1, format!("{e:#}")));
        }

        let host = Arc::clone(&self.host);
        let unit = self.desc.unit;
        let waited = retry_until(self.budgets.stop, || {
            !host
                .check("systemctl", &["is-active", "--quiet", unit])
                .unwrap_or(true)
        });
        match waited {
            Ok(()) => {
                self.state = ServiceState::Stopped;
                Ok(())
            }
            Err(e) => Err(self.fail("stopped", e.attempts, format!("{unit} is still active"))),
        }
    }

    fn restart(&mut self) -> Result<()> {
        self.activate("restart")
    }

    fn reload(&mut self) -> Result<()> {
        if let Err(e) = self.systemctl(&["reload", self.desc.unit]) {
            warn!(unit = self.desc.unit, error = %e, "systemd:reload failed");
            return Err(e);
        }
        info!(unit = self.desc.unit, "systemd:reloaded");
        Ok(())
    }
}
