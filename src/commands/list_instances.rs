//! `fleetpulse list-instances` — discover running instances, sample each one
//! through the bastion, rank and print.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use tracing::info;

use crate::config;
use crate::domain::collector::{self, CollectOptions};
use crate::domain::discovery::{AwsCliDiscovery, Discovery, InstanceFilter};
use crate::domain::instance::InstanceRecord;
use crate::domain::ranker;
use crate::domain::tunnel::{Connector, OpenSshConnector, TunnelConfig};
use crate::error::DiscoveryError;
use crate::render;

pub struct ListArgs {
    pub profile: String,
    pub tags: Vec<String>,
    pub instance_type: Option<String>,
    pub bastion_ip: String,
    pub key_path: PathBuf,
    pub bastion_username: String,
    pub target_username: Option<String>,
    pub workers: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub format: String,
    pub visualize: bool,
}

pub fn run(args: ListArgs, cfg: config::Config) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_async(args, cfg))
}

async fn run_async(args: ListArgs, cfg: config::Config) -> Result<()> {
    let credentials = cfg.resolve_credential(&args.profile)?.clone();
    let filter = InstanceFilter::new(&args.tags, args.instance_type.clone())?;

    if !args.key_path.is_file() {
        bail!("key file {} does not exist", args.key_path.display());
    }

    let options = CollectOptions {
        workers: args.workers.unwrap_or(cfg.collector.workers),
        task_timeout: Duration::from_secs(
            args.timeout_secs.unwrap_or(cfg.collector.task_timeout_secs),
        ),
    };
    if options.workers == 0 {
        bail!("--workers must be at least 1");
    }
    if options.task_timeout.is_zero() {
        bail!("--timeout-secs must be at least 1");
    }

    let connector = OpenSshConnector::new(TunnelConfig {
        bastion_address: args.bastion_ip.clone(),
        bastion_username: args.bastion_username.clone(),
        target_username: args
            .target_username
            .clone()
            .unwrap_or_else(|| cfg.collector.target_username.clone()),
        key_path: args.key_path.clone(),
        connect_timeout: Duration::from_secs(cfg.collector.connect_timeout_secs),
    })?;

    info!(
        profile = %args.profile,
        region = %credentials.region,
        bastion = %args.bastion_ip,
        "listing instances"
    );

    let discovery = AwsCliDiscovery::new(credentials)?;
    let records = list_instances_with_health(&discovery, Arc::new(connector), &filter, &options)
        .await
        .context("discovering instances")?;

    match args.format.as_str() {
        "json" => {
            println!("{}", render::json(&args.profile, &records)?);
        }
        _ => {
            let unavailable = records.iter().filter(|r| r.sample().is_none()).count();
            println!(
                "{} {} instances, {} with metrics, {} unavailable",
                ">>".blue().bold(),
                records.len(),
                records.len() - unavailable,
                if unavailable > 0 {
                    unavailable.to_string().yellow()
                } else {
                    unavailable.to_string().normal()
                }
            );
            println!("{}", render::table(&records));
        }
    }

    if args.visualize {
        println!();
        println!("{}", render::chart(&records));
    }

    Ok(())
}

/// Discovery, collection and ranking. Only discovery errors escape; every
/// discovered instance comes back exactly once.
pub async fn list_instances_with_health<D: Discovery, C: Connector>(
    discovery: &D,
    connector: Arc<C>,
    filter: &InstanceFilter,
    options: &CollectOptions,
) -> Result<Vec<InstanceRecord>, DiscoveryError> {
    let instances = discovery.discover(filter).await?;
    let mut records = collector::collect(connector, instances, options).await;
    ranker::rank(&mut records);
    Ok(records)
}
