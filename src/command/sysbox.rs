use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;
use tracing::warn;

use crate::config::Config;
use crate::service::{Host, ServiceState, SystemHost};
use crate::sysbox::{DaemonStatus, Workers};

use super::{require_root, with_progress};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Action {
    Start,
    Stop,
    Restart,
    Status,
}

pub fn run(action: Action, mgr_args: &[String], fs_args: &[String], verbose: bool) -> Result<()> {
    require_root()?;
    let config = Config::load().context("Failed to load sysbox-cfg configuration")?;
    let host: Arc<dyn Host> = Arc::new(SystemHost);
    let mut workers = Workers::detect(&config, host);

    let has_extra = !mgr_args.is_empty() || !fs_args.is_empty();
    let args_changed = match action {
        Action::Start | Action::Restart => workers.add_args(mgr_args, fs_args)?,
        Action::Stop | Action::Status => {
            if has_extra {
                warn!(?action, "sysbox:extra arguments ignored");
                eprintln!(
                    "{}",
                    style("--mgr-arg/--fs-arg only apply to start and restart").yellow()
                );
            }
            false
        }
    };

    match action {
        Action::Start => {
            with_progress("Starting sysbox", verbose, || workers.start())?;
            println!("{} sysbox-mgr and sysbox-fs are running", style("✓").green());
            if args_changed {
                println!(
                    "{}",
                    style("Launch arguments changed; run 'sysbox-cfg sysbox restart' if the daemons were already running").dim()
                );
            }
        }
        Action::Stop => {
            with_progress("Stopping sysbox", verbose, || workers.stop())?;
            println!("{} sysbox-fs and sysbox-mgr are stopped", style("✓").green());
        }
        Action::Restart => {
            with_progress("Restarting sysbox", verbose, || workers.restart())?;
            println!("{} sysbox-mgr and sysbox-fs restarted", style("✓").green());
        }
        Action::Status => {
            for status in workers.status()? {
                println!("{}", format_status(&status));
            }
        }
    }
    Ok(())
}

fn format_status(status: &DaemonStatus) -> String {
    let state = match status.state {
        ServiceState::Ready => style(status.state).green().to_string(),
        ServiceState::Starting => style(status.state).yellow().to_string(),
        _ => style(status.state).red().to_string(),
    };
    format!(
        "  {} {:<10} {} ({})",
        style("•").dim(),
        status.name,
        state,
        style(status.environment).dim()
    )
}
