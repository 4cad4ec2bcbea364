mod atomic_write;
mod classify;
mod cli;
mod cmd;
mod command;
mod config;
mod daemon_json;
mod engine;
mod error;
mod logger;
mod reconcile;
mod retry;
mod service;
mod spinner;
mod sysbox;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

fn main() -> Result<()> {
    let cli = match cli::Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            std::process::exit(cli::usage_exit_code(&err));
        }
    };
    logger::init(cli.verbose)?;
    info!(args = ?std::env::args().collect::<Vec<_>>(), "sysbox-cfg start");

    match cli::run(cli) {
        Ok(result) => {
            info!("sysbox-cfg finished successfully");
            Ok(result)
        }
        Err(err) => {
            error!(error = ?err, "sysbox-cfg failed");
            Err(err)
        }
    }
}
