//! Operating-system operations the supervisors need.
//!
//! Supervisors never touch processes or run commands directly; they go through
//! [`Host`] so the state machines can be driven against a recording fake.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, trace};

use crate::cmd::Cmd;

/// Linux truncates `/proc/<pid>/comm` to this many bytes.
const COMM_MAX: usize = 15;

pub trait Host: Send + Sync {
    /// Run a command; a non-zero exit is an error carrying stderr.
    fn run(&self, program: &str, args: &[&str]) -> Result<String>;

    /// Run a command and report whether it exited successfully.
    fn check(&self, program: &str, args: &[&str]) -> Result<bool>;

    /// Pids of live processes whose command name is `name`.
    fn pids_of(&self, name: &str) -> Result<Vec<i32>>;

    /// Full argument vector of a process, argv[0] included.
    fn cmdline(&self, pid: i32) -> Result<Vec<String>>;

    /// Deliver a signal. A process that is already gone is not an error.
    fn signal(&self, pid: i32, signal: Signal) -> Result<()>;

    /// Launch a program in the background, logging to `log`. Returns its pid.
    fn spawn(&self, program: &Path, args: &[String], log: &Path) -> Result<u32>;
}

/// The real host, backed by `/proc`, signals and child processes.
pub struct SystemHost;

impl Host for SystemHost {
    fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        Cmd::new(program).args(args).run_and_capture_stdout()
    }

    fn check(&self, program: &str, args: &[&str]) -> Result<bool> {
        Cmd::new(program).args(args).run_as_check()
    }

    fn pids_of(&self, name: &str) -> Result<Vec<i32>> {
        let wanted = comm_name(name);
        let own = std::process::id() as i32;
        let mut pids = Vec::new();

        for entry in fs::read_dir("/proc").context("Failed to read /proc")? {
            let Ok(entry) = entry else { continue };
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|s| s.parse::<i32>().ok())
            else {
                continue;
            };
            if pid == own {
                continue;
            }
            // Processes can exit between readdir and read; skip them.
            let Ok(comm) = fs::read_to_string(entry.path().join("comm")) else {
                continue;
            };
            if comm.trim_end() == wanted {
                pids.push(pid);
            }
        }

        pids.sort_unstable();
        trace!(name, ?pids, "host:pids_of");
        Ok(pids)
    }

    fn cmdline(&self, pid: i32) -> Result<Vec<String>> {
        let raw = fs::read(format!("/proc/{pid}/cmdline"))
            .with_context(|| format!("Failed to read command line of pid {pid}"))?;
        Ok(split_cmdline(&raw))
    }

    fn signal(&self, pid: i32, sig: Signal) -> Result<()> {
        debug!(pid, signal = %sig, "host:signal");
        match signal::kill(Pid::from_raw(pid), sig) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(anyhow!("Failed to send {} to pid {}: {}", sig, pid, e)),
        }
    }

    fn spawn(&self, program: &Path, args: &[String], log: &Path) -> Result<u32> {
        let program = program
            .to_str()
            .ok_or_else(|| anyhow!("Program path is not valid UTF-8: {}", program.display()))?;
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        Cmd::new(program).args(&args).spawn_logged(log)
    }
}

fn comm_name(name: &str) -> &str {
    match name.char_indices().nth(COMM_MAX) {
        Some((idx, _)) => &name[..idx],
        None => name,
    }
}

fn split_cmdline(raw: &[u8]) -> Vec<String> {
    raw.split(|b| *b == 0)
        .filter(|part| !part.is_empty())
        .map(|part| String::from_utf8_lossy(part).into_owned())
        .collect()
}

#[cfg(test)]
pub mod fake {
    //! Recording host used by supervisor and driver tests.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Run(String),
        Check(String),
        Signal(i32, Signal),
        Spawn(String),
    }

    #[derive(Default)]
    struct State {
        calls: Vec<Call>,
        processes: HashMap<String, Vec<i32>>,
        cmdlines: HashMap<i32, Vec<String>>,
        run_responses: HashMap<String, Result<String, String>>,
        check_responses: HashMap<String, Vec<bool>>,
        /// Names whose processes ignore SIGTERM.
        stubborn: Vec<String>,
        /// Text written to the log on spawn.
        spawn_output: Option<String>,
        next_pid: i32,
    }

    #[derive(Default)]
    pub struct FakeHost {
        state: Mutex<State>,
    }

    impl FakeHost {
        pub fn new() -> Self {
            let host = Self::default();
            host.state.lock().unwrap().next_pid = 1000;
            host
        }

        pub fn with_process(self, name: &str, pid: i32, argv: &[&str]) -> Self {
            {
                let mut state = self.state.lock().unwrap();
                state.processes.entry(name.to_string()).or_default().push(pid);
                state
                    .cmdlines
                    .insert(pid, argv.iter().map(|s| s.to_string()).collect());
            }
            self
        }

        /// Respond to `program args...` (joined by spaces).
        pub fn on_run(self, command_line: &str, response: Result<&str, &str>) -> Self {
            self.state.lock().unwrap().run_responses.insert(
                command_line.to_string(),
                response.map(str::to_string).map_err(str::to_string),
            );
            self
        }

        /// Queue check results for `program args...`; the last one repeats.
        pub fn on_check(self, command_line: &str, results: &[bool]) -> Self {
            self.state
                .lock()
                .unwrap()
                .check_responses
                .insert(command_line.to_string(), results.to_vec());
            self
        }

        pub fn stubborn(self, name: &str) -> Self {
            self.state.lock().unwrap().stubborn.push(name.to_string());
            self
        }

        pub fn spawn_writes(self, output: &str) -> Self {
            self.state.lock().unwrap().spawn_output = Some(output.to_string());
            self
        }

        pub fn calls(&self) -> Vec<Call> {
            self.state.lock().unwrap().calls.clone()
        }

        pub fn is_running(&self, name: &str) -> bool {
            self.state
                .lock()
                .unwrap()
                .processes
                .get(name)
                .is_some_and(|p| !p.is_empty())
        }

        fn name_of(state: &State, pid: i32) -> Option<String> {
            state
                .processes
                .iter()
                .find(|(_, pids)| pids.contains(&pid))
                .map(|(name, _)| name.clone())
        }
    }

    fn line(program: &str, args: &[&str]) -> String {
        std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ")
    }

    impl Host for FakeHost {
        fn run(&self, program: &str, args: &[&str]) -> Result<String> {
            let line = line(program, args);
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::Run(line.clone()));
            match state.run_responses.get(&line) {
                Some(Ok(out)) => Ok(out.clone()),
                Some(Err(err)) => Err(anyhow!("Command failed: {}\n{}", line, err)),
                None => Ok(String::new()),
            }
        }

        fn check(&self, program: &str, args: &[&str]) -> Result<bool> {
            let line = line(program, args);
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::Check(line.clone()));
            let Some(queue) = state.check_responses.get_mut(&line) else {
                return Ok(true);
            };
            if queue.len() > 1 {
                Ok(queue.remove(0))
            } else {
                Ok(queue.first().copied().unwrap_or(true))
            }
        }

        fn pids_of(&self, name: &str) -> Result<Vec<i32>> {
            let state = self.state.lock().unwrap();
            Ok(state.processes.get(name).cloned().unwrap_or_default())
        }

        fn cmdline(&self, pid: i32) -> Result<Vec<String>> {
            let state = self.state.lock().unwrap();
            state
                .cmdlines
                .get(&pid)
                .cloned()
                .ok_or_else(|| anyhow!("no such pid {pid}"))
        }

        fn signal(&self, pid: i32, sig: Signal) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::Signal(pid, sig));
            if sig == Signal::SIGTERM
                && let Some(name) = Self::name_of(&state, pid)
                && !state.stubborn.contains(&name)
            {
                if let Some(pids) = state.processes.get_mut(&name) {
                    pids.retain(|p| *p != pid);
                }
            }
            Ok(())
        }

        fn spawn(&self, program: &Path, args: &[String], log: &Path) -> Result<u32> {
            let mut state = self.state.lock().unwrap();
            let mut argv = vec![program.display().to_string()];
            argv.extend(args.iter().cloned());
            state.calls.push(Call::Spawn(argv.join(" ")));

            let pid = state.next_pid;
            state.next_pid += 1;
            let name = program
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            state.processes.entry(name).or_default().push(pid);
            state.cmdlines.insert(pid, argv);

            if let Some(parent) = log.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(log, state.spawn_output.clone().unwrap_or_default())?;
            Ok(pid as u32)
        }
    }
}
