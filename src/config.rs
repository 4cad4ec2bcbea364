use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::retry::RetryPolicy;

const DEFAULT_CONFIG_PATH: &str = "/etc/sysbox-cfg/config.yaml";

/// Paths of the programs this tool launches on the manual path.
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct ProgramPaths {
    /// Default: /usr/bin/dockerd
    pub dockerd: Option<PathBuf>,
    /// Default: /usr/bin/sysbox-mgr
    pub sysbox_mgr: Option<PathBuf>,
    /// Default: /usr/bin/sysbox-fs
    pub sysbox_fs: Option<PathBuf>,
}

impl ProgramPaths {
    pub fn dockerd(&self) -> PathBuf {
        self.dockerd
            .clone()
            .unwrap_or_else(|| PathBuf::from("/usr/bin/dockerd"))
    }

    pub fn sysbox_mgr(&self) -> PathBuf {
        self.sysbox_mgr
            .clone()
            .unwrap_or_else(|| PathBuf::from("/usr/bin/sysbox-mgr"))
    }

    pub fn sysbox_fs(&self) -> PathBuf {
        self.sysbox_fs
            .clone()
            .unwrap_or_else(|| PathBuf::from("/usr/bin/sysbox-fs"))
    }
}

/// Configuration for sysbox-cfg itself, read from /etc/sysbox-cfg/config.yaml.
///
/// Every field is optional; accessors supply the stock locations of a Debian
/// or Ubuntu host.
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct Config {
    /// Docker daemon configuration file. Default: /etc/docker/daemon.json
    #[serde(default)]
    pub docker_config: Option<PathBuf>,

    /// Directories searched for systemd unit files, in priority order.
    #[serde(default)]
    pub unit_dirs: Option<Vec<PathBuf>>,

    /// Directory whose presence means systemd is the running init.
    /// Default: /run/systemd/system
    #[serde(default)]
    pub init_marker: Option<PathBuf>,

    /// Where manually launched daemons write their logs. Default: /var/log
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default)]
    pub programs: ProgramPaths,

    /// Budget for a daemon to report readiness. Default: 30 x 1000ms
    #[serde(default)]
    pub ready_retry: Option<RetryPolicy>,

    /// Budget for a daemon to leave the process table. Default: 20 x 500ms
    #[serde(default)]
    pub stop_retry: Option<RetryPolicy>,
}

impl Config {
    /// Load from `$SYSBOX_CFG_CONFIG` or the default location.
    /// A missing file yields the defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = env::var("SYSBOX_CFG_CONFIG")
            .ok()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        let config = Self::load_from_path(&path)?.unwrap_or_default();
        debug!(
            path = %path.display(),
            docker_config = %config.docker_config().display(),
            "config:loaded"
        );
        Ok(config)
    }

    /// Load configuration from a specific path.
    pub fn load_from_path(path: &Path) -> anyhow::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        debug!(path = %path.display(), "config:reading file");
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("Failed to parse config at {}: {}", path.display(), e))?;
        Ok(Some(config))
    }

    pub fn docker_config(&self) -> PathBuf {
        self.docker_config
            .clone()
            .unwrap_or_else(|| PathBuf::from("/etc/docker/daemon.json"))
    }

    pub fn unit_dirs(&self) -> Vec<PathBuf> {
        self.unit_dirs.clone().unwrap_or_else(|| {
            [
                "/etc/systemd/system",
                "/lib/systemd/system",
                "/usr/lib/systemd/system",
            ]
            .iter()
            .map(PathBuf::from)
            .collect()
        })
    }

    pub fn init_marker(&self) -> PathBuf {
        self.init_marker
            .clone()
            .unwrap_or_else(|| PathBuf::from("/run/systemd/system"))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("/var/log"))
    }

    pub fn ready_retry(&self) -> RetryPolicy {
        self.ready_retry
            .unwrap_or(RetryPolicy::new(30, Duration::from_millis(1000)))
    }

    pub fn stop_retry(&self) -> RetryPolicy {
        self.stop_retry
            .unwrap_or(RetryPolicy::new(20, Duration::from_millis(500)))
    }
}
