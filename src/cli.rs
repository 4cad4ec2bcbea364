use crate::command;
use crate::daemon_json::network::{AddressPool, Cidr};
use crate::engine::CgroupDriver;
use crate::reconcile::{Intent, Toggle};
use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "sysbox-cfg")]
#[command(about = "Configure Docker for the sysbox runtime and supervise the sysbox daemons")]
pub struct Cli {
    /// Print progress to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Edit /etc/docker/daemon.json and apply it to the running engine
    #[command(name = "docker-cfg")]
    DockerCfg(DockerCfgArgs),

    /// Control the sysbox-mgr and sysbox-fs daemons
    Sysbox {
        #[arg(value_enum)]
        action: command::sysbox::Action,

        /// Extra argument for sysbox-mgr (repeatable)
        #[arg(long = "mgr-arg", value_name = "ARG", allow_hyphen_values = true)]
        mgr_args: Vec<String>,

        /// Extra argument for sysbox-fs (repeatable)
        #[arg(long = "fs-arg", value_name = "ARG", allow_hyphen_values = true)]
        fs_args: Vec<String>,
    },

    /// Generate shell completions
    Completions {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(clap::Args, Debug)]
struct DockerCfgArgs {
    /// Register or remove the sysbox-runc runtime
    #[arg(long, value_enum, value_name = "enable|disable")]
    sysbox_runtime: Option<Toggle>,

    /// Enable or disable user-namespace remapping
    #[arg(long, value_enum, value_name = "enable|disable")]
    userns_remap: Option<Toggle>,

    /// Runtime used when a container does not name one
    #[arg(long, value_name = "NAME")]
    default_runtime: Option<String>,

    /// Use the containerd image store
    #[arg(long, value_name = "true|false")]
    containerd_image_store: Option<bool>,

    /// Bridge IP and netmask for docker0, e.g. 172.20.0.1/16
    #[arg(long, value_name = "CIDR", value_parser = parse_cidr)]
    bip: Option<Cidr>,

    /// Pool for user-defined networks: <cidr> or base=<cidr>,size=<n>
    #[arg(long, value_name = "POOL", value_parser = parse_address_pool)]
    default_address_pool: Option<AddressPool>,

    /// Cgroup driver on the dockerd command line
    #[arg(long, value_enum)]
    cgroup_driver: Option<CgroupDriver>,

    /// Write the configuration but do not reload or restart anything
    #[arg(short = 'c', long, conflicts_with = "force_restart")]
    config_only: bool,

    /// Restart dockerd even if nothing disruptive changed or containers exist
    #[arg(short = 'f', long)]
    force_restart: bool,

    /// Print the resulting configuration without writing it
    #[arg(long)]
    dry_run: bool,
}

impl From<DockerCfgArgs> for Intent {
    fn from(args: DockerCfgArgs) -> Self {
        Intent {
            sysbox_runtime: args.sysbox_runtime,
            default_runtime: args.default_runtime,
            userns_remap: args.userns_remap,
            containerd_image_store: args.containerd_image_store,
            bip: args.bip,
            default_address_pool: args.default_address_pool,
            cgroup_driver: args.cgroup_driver,
            config_only: args.config_only,
            force_restart: args.force_restart,
            dry_run: args.dry_run,
        }
    }
}

fn parse_cidr(s: &str) -> Result<Cidr, String> {
    s.parse()
}

fn parse_address_pool(s: &str) -> Result<AddressPool, String> {
    s.parse()
}

// --- Public Entry Point ---
pub fn run(cli: Cli) -> Result<()> {
    let verbose = cli.verbose;
    match cli.command {
        Commands::DockerCfg(args) => command::docker_cfg::run(args.into(), verbose),
        Commands::Sysbox {
            action,
            mgr_args,
            fs_args,
        } => command::sysbox::run(action, &mgr_args, &fs_args, verbose),
        Commands::Completions { shell } => {
            generate_completions(shell);
            Ok(())
        }
    }
}

/// Exit status for a failed parse: 0 for `--help`/`--version`, 1 for usage errors.
pub fn usage_exit_code(err: &clap::Error) -> i32 {
    if err.exit_code() == 0 { 0 } else { 1 }
}

fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut std::io::stdout());
}
