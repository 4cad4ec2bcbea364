pub mod docker_cfg;
pub mod sysbox;

use anyhow::Result;

use crate::error::Error;
use crate::spinner;

/// Every subcommand edits root-owned files or signals root-owned daemons.
pub fn require_root() -> Result<(), Error> {
    if nix::unistd::geteuid().is_root() {
        Ok(())
    } else {
        Err(Error::precondition(
            "sysbox-cfg must be run as root (try again with sudo)",
        ))
    }
}

/// Run `op` under a spinner, unless log lines already go to stderr.
pub fn with_progress<T, F>(msg: &str, verbose: bool, op: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    if verbose {
        op()
    } else {
        spinner::with_spinner(msg, op)
    }
}
