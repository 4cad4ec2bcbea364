use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;

use crate::classify::Verdict;
use crate::config::Config;
use crate::daemon_json;
use crate::engine;
use crate::reconcile::{self, Intent, Outcome, Report};
use crate::service::{self, Host, SystemHost};

use super::{require_root, with_progress};

pub fn run(intent: Intent, verbose: bool) -> Result<()> {
    require_root()?;
    let config = Config::load().context("Failed to load sysbox-cfg configuration")?;
    let path = config.docker_config();

    let host: Arc<dyn Host> = Arc::new(SystemHost);
    let mut dockerd =
        service::create_supervisor(engine::descriptor(&config), &config, Arc::clone(&host));

    let report = if intent.dry_run {
        reconcile::reconcile(&intent, &path, dockerd.as_mut(), host.as_ref())?
    } else {
        with_progress("Applying Docker configuration", verbose, || {
            reconcile::reconcile(&intent, &path, dockerd.as_mut(), host.as_ref())
        })?
    };

    if intent.dry_run {
        print!("{}", daemon_json::render(&report.document));
    }
    print_summary(&report, &path);
    Ok(())
}

fn print_summary(report: &Report, path: &Path) {
    let categories = report.categories();
    if !categories.is_empty() {
        let names: Vec<&str> = categories.iter().map(|c| c.name()).collect();
        println!("{} {}", style("Changed:").bold(), names.join(", "));
    }
    println!("{} {}", style("Verdict:").bold(), report.verdict);
    if report.cgroup_unknown {
        println!(
            "{}",
            style("dockerd is not running; start it and rerun to apply --cgroup-driver").yellow()
        );
    }

    let message = describe(&report.outcome, report.verdict, path);
    match report.outcome {
        Outcome::GuardRefused { .. } => println!("{}", style(message).yellow()),
        Outcome::Unchanged | Outcome::DryRun => println!("{}", style(message).dim()),
        _ => println!("{} {}", style("✓").green(), message),
    }
}

fn describe(outcome: &Outcome, verdict: Verdict, path: &Path) -> String {
    let path = path.display();
    match outcome {
        Outcome::DryRun => format!("Dry run: {path} was not modified"),
        Outcome::ConfigOnly if verdict == Verdict::None => {
            format!("{path} is already up to date")
        }
        Outcome::ConfigOnly => {
            format!("Wrote {path}; changes take effect the next time dockerd starts")
        }
        Outcome::Unchanged => format!("{path} is already up to date"),
        Outcome::DaemonAbsent => {
            format!("Wrote {path}; dockerd is not running, changes apply when it starts")
        }
        Outcome::Reloaded => format!("Wrote {path} and reloaded dockerd"),
        Outcome::Restarted => format!("Wrote {path} and restarted dockerd"),
        Outcome::GuardRefused { guidance } => {
            format!("Wrote {path} but did not restart dockerd.\n{guidance}")
        }
    }
}
