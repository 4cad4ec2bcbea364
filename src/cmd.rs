use anyhow::{Context, Result, anyhow};
use std::fs::File;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tracing::{debug, trace};

/// A builder for executing external commands with unified error handling
pub struct Cmd<'a> {
    command: &'a str,
    args: Vec<&'a str>,
}

impl<'a> Cmd<'a> {
    /// Create a new command builder
    pub fn new(command: &'a str) -> Self {
        Self {
            command,
            args: Vec::new(),
        }
    }

    /// Add a single argument
    #[allow(dead_code)]
    pub fn arg(mut self, arg: &'a str) -> Self {
        self.args.push(arg);
        self
    }

    /// Add multiple arguments
    pub fn args(mut self, args: &[&'a str]) -> Self {
        self.args.extend_from_slice(args);
        self
    }

    /// Execute the command and return the output
    /// Returns an error if the command fails (non-zero exit code)
    pub fn run(self) -> Result<Output> {
        let Cmd { command, args } = self;
        trace!(command, args = ?args, "cmd:run start");

        let output = Command::new(command)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Failed to execute command: {} {}", command, args.join(" ")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(
                command,
                args = ?args,
                status = ?output.status.code(),
                stderr = %stderr.trim(),
                "cmd:run failure"
            );
            return Err(anyhow!(
                "Command failed: {} {}\n{}",
                command,
                args.join(" "),
                stderr.trim()
            ));
        }
        trace!(command, "cmd:run success");
        Ok(output)
    }

    /// Execute the command and return stdout as a trimmed string
    pub fn run_and_capture_stdout(self) -> Result<String> {
        let output = self.run()?;
        Ok(String::from_utf8(output.stdout)?.trim().to_string())
    }

    /// Execute the command, returning Ok(true) if it succeeds, Ok(false) if it fails
    /// This is useful for commands that are used as checks (e.g., systemctl is-active)
    pub fn run_as_check(self) -> Result<bool> {
        let Cmd { command, args } = self;
        trace!(command, args = ?args, "cmd:check start");

        let status = Command::new(command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| format!("Failed to execute command: {} {}", command, args.join(" ")))?;

        let success = status.success();
        trace!(command, success, "cmd:check result");
        Ok(success)
    }

    /// Launch the command in the background with stdout and stderr sent to `log`.
    ///
    /// The log is truncated first so a readiness marker from a previous run is
    /// never mistaken for the new process. Returns the child's pid; the child is
    /// not waited on and outlives this process.
    pub fn spawn_logged(self, log: &Path) -> Result<u32> {
        let Cmd { command, args } = self;
        debug!(command, args = ?args, log = %log.display(), "cmd:spawn");

        if let Some(parent) = log.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }
        let stdout = File::create(log)
            .with_context(|| format!("Failed to open log file {}", log.display()))?;
        let stderr = stdout.try_clone().context("Failed to duplicate log handle")?;

        let child = Command::new(command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .with_context(|| format!("Failed to launch {} {}", command, args.join(" ")))?;

        Ok(child.id())
    }
}
