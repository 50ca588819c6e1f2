mod commands;
mod config;
mod domain;
mod error;
mod render;
mod tools;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::list_instances::ListArgs;

#[derive(Parser)]
#[command(
    name = "fleetpulse",
    version,
    about = "Instance inventory with live health sampled through a bastion"
)]
struct Cli {
    /// Log level (overrides config, overridden by RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store cloud credentials for a profile
    Setup,

    /// List running instances with CPU, IO wait, RAM and disk usage
    ListInstances {
        /// Credentials profile to use
        #[arg(long, default_value = "default")]
        profile: String,

        /// Tag filter, format key:value (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Only instances of this type
        #[arg(long)]
        instance_type: Option<String>,

        /// Bastion host address
        #[arg(long)]
        bastion_ip: String,

        /// SSH private key used for the bastion and the instances
        #[arg(long)]
        key_path: PathBuf,

        /// Username on the bastion host
        #[arg(long, default_value = "ec2-user")]
        bastion_username: String,

        /// Username on the instances (overrides config)
        #[arg(long)]
        target_username: Option<String>,

        /// Maximum concurrent sessions (overrides config)
        #[arg(long)]
        workers: Option<usize>,

        /// Per-instance deadline in seconds (overrides config)
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Output format (table or json)
        #[arg(long, default_value = "table")]
        format: String,

        /// Draw CPU and RAM bars after the listing
        #[arg(long)]
        visualize: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Setup => {
            init_tracing(cli.log_level.as_deref(), "warn", cli.log_json);
            commands::setup::run()
        }
        Commands::ListInstances {
            profile,
            tags,
            instance_type,
            bastion_ip,
            key_path,
            bastion_username,
            target_username,
            workers,
            timeout_secs,
            format,
            visualize,
        } => {
            let cfg = config::load()?;
            init_tracing(cli.log_level.as_deref(), &cfg.log_level, cli.log_json);
            commands::list_instances::run(
                ListArgs {
                    profile,
                    tags,
                    instance_type,
                    bastion_ip,
                    key_path,
                    bastion_username,
                    target_username,
                    workers,
                    timeout_secs,
                    format,
                    visualize,
                },
                cfg,
            )
        }
    }
}

/// Logs go to stderr so stdout carries only the listing.
fn init_tracing(cli_level: Option<&str>, config_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli_level.unwrap_or(config_level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
