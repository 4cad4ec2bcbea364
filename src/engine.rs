//! The Docker daemon as a supervised service.
//!
//! Beyond the generic descriptor this covers the two Docker-specific pieces:
//! the cgroup driver, which is a launch argument rather than a `daemon.json`
//! key, and the guard against restarting underneath existing containers.

use std::fmt;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::service::{Host, ServiceDescriptor};

/// Log line dockerd prints once its API socket is up.
pub const READY_MARKER: &str = "API listen on";

/// Shown when a restart is refused because containers exist.
pub const CLEANUP_COMMAND: &str = "docker stop $(docker ps -aq) && docker rm $(docker ps -aq)";

const EXEC_OPT: &str = "--exec-opt";
const CGROUP_DRIVER_OPT: &str = "native.cgroupdriver=";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CgroupDriver {
    Cgroupfs,
    Systemd,
}

impl CgroupDriver {
    pub fn as_str(self) -> &'static str {
        match self {
            CgroupDriver::Cgroupfs => "cgroupfs",
            CgroupDriver::Systemd => "systemd",
        }
    }
}

impl fmt::Display for CgroupDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn descriptor(config: &Config) -> ServiceDescriptor {
    ServiceDescriptor {
        name: "dockerd",
        unit: "docker.service",
        program: config.programs.dockerd(),
        log_path: config.log_dir().join("dockerd.log"),
        ready_marker: READY_MARKER,
        default_args: Vec::new(),
    }
}

/// The cgroup driver named on a dockerd command line, if any.
///
/// Both `--exec-opt native.cgroupdriver=X` and `--exec-opt=native.cgroupdriver=X`
/// are recognized; the last occurrence wins, as in dockerd.
pub fn cgroup_driver(args: &[String]) -> Option<String> {
    exec_opts(args)
        .filter_map(|(_, opt)| opt.strip_prefix(CGROUP_DRIVER_OPT))
        .last()
        .map(str::to_string)
}

/// `args` with every cgroup driver option replaced by a single `driver` one.
pub fn with_cgroup_driver(args: &[String], driver: CgroupDriver) -> Vec<String> {
    let drop: Vec<usize> = exec_opts(args)
        .filter(|(_, opt)| opt.starts_with(CGROUP_DRIVER_OPT))
        .flat_map(|(idx, _)| {
            if args[idx] == EXEC_OPT {
                vec![idx, idx + 1]
            } else {
                vec![idx]
            }
        })
        .collect();

    let mut out: Vec<String> = args
        .iter()
        .enumerate()
        .filter(|(idx, _)| !drop.contains(idx))
        .map(|(_, arg)| arg.clone())
        .collect();
    out.push(EXEC_OPT.to_string());
    out.push(format!("{CGROUP_DRIVER_OPT}{driver}"));
    out
}

/// `(index of the flag, option value)` for every `--exec-opt` on the line.
fn exec_opts(args: &[String]) -> impl Iterator<Item = (usize, &str)> {
    args.iter().enumerate().filter_map(|(idx, arg)| {
        if arg == EXEC_OPT {
            args.get(idx + 1).map(|v| (idx, v.as_str()))
        } else {
            arg.strip_prefix("--exec-opt=").map(|v| (idx, v))
        }
    })
}

/// Whether the engine has any containers, running or stopped.
pub fn containers_present(host: &dyn Host) -> Result<bool> {
    let ids = host
        .run("docker", &["ps", "-aq"])
        .context("Failed to list containers")?;
    Ok(ids.lines().any(|l| !l.trim().is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::host::fake::FakeHost;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_cgroup_driver_absent() {
        assert_eq!(cgroup_driver(&strings(&["-H", "fd://"])), None);
    }

    #[test]
    fn test_cgroup_driver_both_spellings() {
        assert_eq!(
            cgroup_driver(&strings(&["--exec-opt", "native.cgroupdriver=systemd"])),
            Some("systemd".to_string())
        );
        assert_eq!(
            cgroup_driver(&strings(&["--exec-opt=native.cgroupdriver=cgroupfs"])),
            Some("cgroupfs".to_string())
        );
    }

    #[test]
    fn test_with_cgroup_driver_appends() {
        let args = with_cgroup_driver(&strings(&["-H", "fd://"]), CgroupDriver::Systemd);
        assert_eq!(
            args,
            strings(&["-H", "fd://", "--exec-opt", "native.cgroupdriver=systemd"])
        );
    }

    #[test]
    fn test_with_cgroup_driver_replaces_existing_and_keeps_other_exec_opts() {
        let args = strings(&[
            "--exec-opt=native.cgroupdriver=cgroupfs",
            "--exec-opt",
            "native.umask=normal",
            "--exec-opt",
            "native.cgroupdriver=cgroupfs",
            "-D",
        ]);
        let out = with_cgroup_driver(&args, CgroupDriver::Systemd);
        assert_eq!(
            out,
            strings(&[
                "--exec-opt",
                "native.umask=normal",
                "-D",
                "--exec-opt",
                "native.cgroupdriver=systemd",
            ])
        );
        assert_eq!(cgroup_driver(&out), Some("systemd".to_string()));
    }

    #[test]
    fn test_with_cgroup_driver_is_stable() {
        let once = with_cgroup_driver(&strings(&["-H", "fd://"]), CgroupDriver::Cgroupfs);
        let twice = with_cgroup_driver(&once, CgroupDriver::Cgroupfs);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_containers_present() {
        let host = FakeHost::new().on_run("docker ps -aq", Ok("3f4e1c2a9b7d\n8a1b2c3d4e5f"));
        assert!(containers_present(&host).unwrap());

        let host = FakeHost::new().on_run("docker ps -aq", Ok(""));
        assert!(!containers_present(&host).unwrap());
    }

    #[test]
    fn test_containers_present_propagates_failure() {
        let host = FakeHost::new().on_run("docker ps -aq", Err("Cannot connect to the Docker daemon"));
        assert!(containers_present(&host).is_err());
    }
}
