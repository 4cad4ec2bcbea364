//! Drives one `docker-cfg` invocation: intent, edits, verdict, action.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::classify::{self, Category, Verdict};
use crate::daemon_json::{self, Edit, edit::Applied};
use crate::daemon_json::network::{AddressPool, Cidr};
use crate::engine::{self, CgroupDriver};
use crate::service::{Environment, Host, Supervisor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Toggle {
    Enable,
    Disable,
}

/// The changes requested on the command line. Unset fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct Intent {
    pub sysbox_runtime: Option<Toggle>,
    pub default_runtime: Option<String>,
    pub userns_remap: Option<Toggle>,
    pub containerd_image_store: Option<bool>,
    pub bip: Option<Cidr>,
    pub default_address_pool: Option<AddressPool>,
    pub cgroup_driver: Option<CgroupDriver>,
    pub config_only: bool,
    pub force_restart: bool,
    pub dry_run: bool,
}

impl Intent {
    /// Document edits, always in the same order regardless of flag order.
    pub fn edits(&self) -> Vec<Edit> {
        let mut edits = Vec::new();
        match self.sysbox_runtime {
            Some(Toggle::Enable) => edits.push(Edit::register_sysbox()),
            Some(Toggle::Disable) => edits.push(Edit::remove_sysbox()),
            None => {}
        }
        if let Some(name) = &self.default_runtime {
            edits.push(Edit::DefaultRuntime(name.clone()));
        }
        match self.userns_remap {
            Some(Toggle::Enable) => edits.push(Edit::EnableUsernsRemap),
            Some(Toggle::Disable) => edits.push(Edit::DisableUsernsRemap),
            None => {}
        }
        if let Some(enabled) = self.containerd_image_store {
            edits.push(Edit::ContainerdImageStore(enabled));
        }
        if let Some(bip) = self.bip {
            edits.push(Edit::Bip(bip));
        }
        if let Some(pool) = self.default_address_pool {
            edits.push(Edit::DefaultAddressPool(pool));
        }
        edits
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing was written and no daemon was touched.
    DryRun,
    /// Written to disk; the daemon picks it up on its next start.
    ConfigOnly,
    Unchanged,
    /// The engine is not running, so there is nothing to apply the change to.
    DaemonAbsent,
    Reloaded,
    Restarted,
    /// A restart was needed but containers exist and force was not given.
    GuardRefused { guidance: String },
}

#[derive(Debug)]
pub struct Report {
    pub document: Value,
    pub applied: Vec<Applied>,
    pub cgroup_changed: bool,
    /// A cgroup driver was requested but the engine's launch line is not
    /// known: a manual-path engine that is not running.
    pub cgroup_unknown: bool,
    pub verdict: Verdict,
    pub outcome: Outcome,
}

impl Report {
    pub fn categories(&self) -> Vec<Category> {
        let mut cats: Vec<Category> = self.applied.iter().map(|a| a.category).collect();
        if self.cgroup_changed {
            cats.push(Category::Cgroup);
        }
        cats.sort();
        cats.dedup();
        cats
    }
}

pub fn guard_guidance() -> String {
    format!(
        "Containers exist; restarting the engine would stop them.\n\
         Remove them first:\n  {}\n\
         or rerun with --force-restart.",
        engine::CLEANUP_COMMAND
    )
}

/// Apply `intent` to the document at `config_path` and act on the verdict.
pub fn reconcile(
    intent: &Intent,
    config_path: &Path,
    dockerd: &mut dyn Supervisor,
    host: &dyn Host,
) -> Result<Report> {
    let current = daemon_json::load(config_path)?;
    let (document, applied) = daemon_json::apply_all(&current, &intent.edits());

    let cgroup_unknown = intent.cgroup_driver.is_some()
        && !intent.dry_run
        && dockerd.environment() == Environment::Manual
        && !dockerd.is_running()?;
    if cgroup_unknown {
        warn!("reconcile:dockerd not running, launch line unknown, cgroup driver not applied");
    }

    // Dry-run never reads launch arguments; a requested driver counts as a change.
    let cgroup_args = match intent.cgroup_driver {
        Some(driver) if !intent.dry_run && !cgroup_unknown => {
            let args = dockerd.launch_args().context("Failed to read engine launch arguments")?;
            let current = engine::cgroup_driver(&args);
            debug!(current = ?current, wanted = %driver, "reconcile:cgroup driver");
            if current.as_deref() == Some(driver.as_str()) {
                None
            } else {
                Some(engine::with_cgroup_driver(&args, driver))
            }
        }
        _ => None,
    };
    let cgroup_changed = cgroup_args.is_some() || (intent.dry_run && intent.cgroup_driver.is_some());

    let mut categories: Vec<Category> = applied.iter().map(|a| a.category).collect();
    if cgroup_changed {
        categories.push(Category::Cgroup);
    }
    let verdict = classify::verdict(categories, intent.force_restart);
    info!(
        applied = applied.len(),
        cgroup_changed,
        %verdict,
        dry_run = intent.dry_run,
        "reconcile:classified"
    );

    let report = |outcome| Report {
        document: document.clone(),
        applied: applied.clone(),
        cgroup_changed,
        cgroup_unknown,
        verdict,
        outcome,
    };

    daemon_json::commit(&document, config_path, intent.dry_run)?;
    if intent.dry_run {
        return Ok(report(Outcome::DryRun));
    }

    if let Some(args) = cgroup_args {
        dockerd
            .set_launch_args(args)
            .context("Failed to update engine launch arguments")?;
        if dockerd.environment() == Environment::Manual
            && (intent.config_only || verdict == Verdict::None)
        {
            warn!("reconcile:cgroup driver is only applied when this tool restarts dockerd");
        }
    }

    if intent.config_only {
        return Ok(report(Outcome::ConfigOnly));
    }

    let outcome = match verdict {
        Verdict::None => Outcome::Unchanged,
        Verdict::SignalOnly => {
            if dockerd.is_running()? {
                dockerd.reload().context("Failed to reload dockerd")?;
                Outcome::Reloaded
            } else {
                Outcome::DaemonAbsent
            }
        }
        Verdict::FullRestart => {
            if !dockerd.is_running()? {
                Outcome::DaemonAbsent
            } else if !intent.force_restart && engine::containers_present(host)? {
                warn!("reconcile:restart refused, containers present");
                Outcome::GuardRefused {
                    guidance: guard_guidance(),
                }
            } else {
                dockerd.restart().context("Failed to restart dockerd")?;
                Outcome::Restarted
            }
        }
    };
    info!(outcome = ?outcome, "reconcile:done");

    Ok(report(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::Error;
    use crate::retry::RetryPolicy;
    use crate::service::host::fake::{Call, FakeHost};
    use crate::service::{Budgets, ManualSupervisor};
    use nix::sys::signal::Signal;
    use serde_json::json;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        _tmp: tempfile::TempDir,
        path: PathBuf,
        host: Arc<FakeHost>,
        dockerd: ManualSupervisor,
    }

    impl Fixture {
        fn new(host: FakeHost) -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let config = Config {
                log_dir: Some(tmp.path().join("log")),
                ..Config::default()
            };
            let host = Arc::new(host);
            let budgets = Budgets {
                ready: RetryPolicy::new(2, Duration::ZERO),
                stop: RetryPolicy::new(2, Duration::ZERO),
            };
            let dockerd = ManualSupervisor::new(engine::descriptor(&config), host.clone(), budgets);
            Self {
                path: tmp.path().join("docker").join("daemon.json"),
                _tmp: tmp,
                host,
                dockerd,
            }
        }

        fn run(&mut self, intent: &Intent) -> Result<Report> {
            reconcile(intent, &self.path, &mut self.dockerd, self.host.as_ref())
        }

        fn on_disk(&self) -> Value {
            serde_json::from_str(&fs::read_to_string(&self.path).unwrap()).unwrap()
        }
    }

    fn dockerd_running() -> FakeHost {
        FakeHost::new()
            .with_process("dockerd", 5, &["/usr/bin/dockerd", "-H", "fd://"])
            .spawn_writes("level=info msg=\"API listen on /run/docker.sock\"\n")
    }

    fn enable_sysbox() -> Intent {
        Intent {
            sysbox_runtime: Some(Toggle::Enable),
            ..Intent::default()
        }
    }

    #[test]
    fn test_fresh_install_registers_runtime_without_touching_daemon() {
        let mut fx = Fixture::new(FakeHost::new());

        let report = fx.run(&enable_sysbox()).unwrap();

        assert_eq!(
            fx.on_disk(),
            json!({"runtimes": {"sysbox-runc": {"path": "/usr/bin/sysbox-runc"}}})
        );
        assert_eq!(report.verdict, Verdict::SignalOnly);
        assert_eq!(report.outcome, Outcome::DaemonAbsent);
        assert!(fx.host.calls().is_empty());
    }

    #[test]
    fn test_second_run_is_unchanged_and_byte_identical() {
        let mut fx = Fixture::new(dockerd_running());
        let intent = Intent {
            bip: Some("172.20.0.1/16".parse().unwrap()),
            ..enable_sysbox()
        };
        fx.run(&Intent {
            force_restart: false,
            config_only: true,
            ..intent.clone()
        })
        .unwrap();
        let first = fs::read(&fx.path).unwrap();

        let report = fx.run(&intent).unwrap();

        assert_eq!(report.verdict, Verdict::None);
        assert_eq!(report.outcome, Outcome::Unchanged);
        assert!(report.applied.is_empty());
        assert_eq!(fs::read(&fx.path).unwrap(), first);
        assert!(fx.host.calls().is_empty());
    }

    #[test]
    fn test_runtime_change_reloads_running_engine() {
        let mut fx = Fixture::new(dockerd_running());

        let report = fx.run(&enable_sysbox()).unwrap();

        assert_eq!(report.outcome, Outcome::Reloaded);
        assert_eq!(fx.host.calls(), vec![Call::Signal(5, Signal::SIGHUP)]);
    }

    #[test]
    fn test_guard_refuses_restart_with_containers() {
        let host = dockerd_running().on_run("docker ps -aq", Ok("0f1e2d3c4b5a\n"));
        let mut fx = Fixture::new(host);
        let intent = Intent {
            userns_remap: Some(Toggle::Enable),
            ..Intent::default()
        };

        let report = fx.run(&intent).unwrap();

        assert_eq!(report.verdict, Verdict::FullRestart);
        match &report.outcome {
            Outcome::GuardRefused { guidance } => {
                assert!(guidance.contains(engine::CLEANUP_COMMAND));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(
            !fx.host
                .calls()
                .iter()
                .any(|c| matches!(c, Call::Signal(..) | Call::Spawn(_)))
        );
        // The document is already committed; it applies on the next restart.
        assert_eq!(fx.on_disk()["userns-remap"], json!("sysbox"));
    }

    #[test]
    fn test_force_skips_guard() {
        let host = dockerd_running().on_run("docker ps -aq", Ok("0f1e2d3c4b5a\n"));
        let mut fx = Fixture::new(host);
        let intent = Intent {
            force_restart: true,
            ..Intent::default()
        };

        let report = fx.run(&intent).unwrap();

        assert_eq!(report.verdict, Verdict::FullRestart);
        assert_eq!(report.outcome, Outcome::Restarted);
        assert!(!fx.host.calls().contains(&Call::Run("docker ps -aq".to_string())));
    }

    #[test]
    fn test_cgroup_driver_restarts_with_new_launch_line() {
        let mut fx = Fixture::new(dockerd_running());
        let intent = Intent {
            cgroup_driver: Some(CgroupDriver::Systemd),
            ..Intent::default()
        };

        let report = fx.run(&intent).unwrap();

        assert!(report.cgroup_changed);
        assert_eq!(report.categories(), vec![Category::Cgroup]);
        assert_eq!(report.outcome, Outcome::Restarted);
        assert_eq!(
            fx.host.calls(),
            vec![
                Call::Run("docker ps -aq".to_string()),
                Call::Signal(5, Signal::SIGTERM),
                Call::Spawn(
                    "/usr/bin/dockerd -H fd:// --exec-opt native.cgroupdriver=systemd".to_string()
                ),
            ]
        );
    }

    #[test]
    fn test_cgroup_driver_already_set_is_not_a_change() {
        let host = FakeHost::new().with_process(
            "dockerd",
            5,
            &["/usr/bin/dockerd", "--exec-opt", "native.cgroupdriver=systemd", "-D"],
        );
        let mut fx = Fixture::new(host);
        let intent = Intent {
            cgroup_driver: Some(CgroupDriver::Systemd),
            ..Intent::default()
        };

        let report = fx.run(&intent).unwrap();

        assert!(!report.cgroup_changed);
        assert_eq!(report.verdict, Verdict::None);
    }

    #[test]
    fn test_cgroup_driver_with_stopped_manual_engine_is_stable() {
        let mut fx = Fixture::new(FakeHost::new());
        let intent = Intent {
            cgroup_driver: Some(CgroupDriver::Systemd),
            ..Intent::default()
        };

        for _ in 0..2 {
            let report = fx.run(&intent).unwrap();
            assert!(!report.cgroup_changed);
            assert!(report.cgroup_unknown);
            assert_eq!(report.verdict, Verdict::None);
            assert_eq!(report.outcome, Outcome::Unchanged);
        }
        assert!(fx.host.calls().is_empty());
    }

    #[test]
    fn test_dry_run_writes_nothing_and_calls_nothing() {
        let mut fx = Fixture::new(dockerd_running());
        let intent = Intent {
            dry_run: true,
            cgroup_driver: Some(CgroupDriver::Cgroupfs),
            ..enable_sysbox()
        };

        let report = fx.run(&intent).unwrap();

        assert_eq!(report.outcome, Outcome::DryRun);
        assert_eq!(report.verdict, Verdict::FullRestart);
        assert_eq!(
            report.document,
            json!({"runtimes": {"sysbox-runc": {"path": "/usr/bin/sysbox-runc"}}})
        );
        assert!(!fx.path.exists());
        assert!(fx.host.calls().is_empty());
    }

    #[test]
    fn test_config_only_never_touches_processes() {
        let mut fx = Fixture::new(dockerd_running());
        let intent = Intent {
            config_only: true,
            default_address_pool: Some("10.10.0.0/16".parse().unwrap()),
            ..Intent::default()
        };

        let report = fx.run(&intent).unwrap();

        assert_eq!(report.verdict, Verdict::FullRestart);
        assert_eq!(report.outcome, Outcome::ConfigOnly);
        assert_eq!(
            fx.on_disk()["default-address-pools"],
            json!([{"base": "10.10.0.0/16", "size": 24}])
        );
        assert!(fx.host.calls().is_empty());
    }

    #[test]
    fn test_unknown_keys_survive() {
        let mut fx = Fixture::new(FakeHost::new());
        fs::create_dir_all(fx.path.parent().unwrap()).unwrap();
        fs::write(&fx.path, r#"{"log-driver": "journald", "debug": true}"#).unwrap();

        fx.run(&enable_sysbox()).unwrap();

        let keys: Vec<String> = fx.on_disk().as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["log-driver", "debug", "runtimes"]);
    }

    #[test]
    fn test_unreadable_document_is_left_alone() {
        let mut fx = Fixture::new(FakeHost::new());
        fs::create_dir_all(fx.path.parent().unwrap()).unwrap();
        fs::write(&fx.path, "{ not json").unwrap();

        let err = fx.run(&enable_sysbox()).unwrap_err();

        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::ConfigRead { .. })));
        assert_eq!(fs::read_to_string(&fx.path).unwrap(), "{ not json");
    }

    #[test]
    fn test_edit_order_is_fixed() {
        let intent = Intent {
            default_address_pool: Some("10.10.0.0/16".parse().unwrap()),
            bip: Some("172.20.0.1/16".parse().unwrap()),
            containerd_image_store: Some(true),
            userns_remap: Some(Toggle::Disable),
            default_runtime: Some("runc".to_string()),
            sysbox_runtime: Some(Toggle::Enable),
            ..Intent::default()
        };
        let categories: Vec<Category> = intent.edits().iter().map(Edit::category).collect();
        assert_eq!(
            categories,
            vec![
                Category::Runtime,
                Category::Runtime,
                Category::Identity,
                Category::ImageStore,
                Category::Network,
                Category::Network,
            ]
        );
    }
}
