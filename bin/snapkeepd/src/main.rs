//! Snapkeep daemon and operator CLI
//!
//! Opens the identity registry, feeds it from the zfs inventory, and
//! exposes the operator surface: one-shot sync, tagging, listing, manual
//! snapshots, and identity pruning.

mod ops;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use snapkeep_common::Config;
use snapkeep_registry::IdentityRegistry;
use snapkeep_zfs::{Zfs, pools};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "snapkeepd")]
#[command(about = "Snapkeep dataset identity and snapshot-policy daemon")]
#[command(version)]
struct Args {
    /// Directory holding the registry and per-dataset store files
    #[arg(long, env = "SNAPKEEP_DATA_DIR", default_value = "/var/lib/snapkeep")]
    data_dir: PathBuf,

    /// ZFS user property carrying the persisted dataset identity
    #[arg(long, default_value = "com.snapkeep:id")]
    id_property: String,

    /// ZFS user property carrying the declared policy set
    #[arg(long, default_value = "com.snapkeep:policies")]
    policy_property: String,

    /// Seconds between inventory refresh passes in daemon mode
    #[arg(long, default_value = "600")]
    refresh_interval: u64,

    /// Prefix for snapshots created through snapkeep
    #[arg(long, default_value = "sk_auto_")]
    snapshot_prefix: String,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daemon: tag and register datasets on a fixed cadence
    Run,
    /// One inventory pass: tag untagged datasets and register everything
    Sync,
    /// Assign identities to untagged datasets without registering
    Tag,
    /// Print the dataset inventory
    List {
        #[arg(long)]
        json: bool,
    },
    /// Print the imported pools
    Pools {
        #[arg(long)]
        json: bool,
    },
    /// Print the stored policy set for a dataset
    Policies {
        dataset: String,
        #[arg(long)]
        json: bool,
    },
    /// Take one snapshot per stored policy of a dataset
    Snap {
        dataset: String,
        #[arg(long)]
        recursive: bool,
    },
    /// Remove an identity and its policy store (by dataset name or id)
    Prune {
        target: String,
        /// Confirm the removal
        #[arg(long)]
        yes: bool,
    },
}

impl Args {
    fn config(&self) -> Config {
        Config {
            data_dir: self.data_dir.clone(),
            refresh_interval_secs: self.refresh_interval,
            snapshot_prefix: self.snapshot_prefix.clone(),
            policy_property: self.policy_property.clone(),
            id_property: self.id_property.clone(),
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.config();
    let zfs = Zfs::from_config(&config);

    match args.command {
        Command::Run => {
            let registry = open_registry(&config, true)?;
            info!(
                interval_secs = config.refresh_interval_secs,
                "snapkeepd started"
            );
            loop {
                match ops::sync_once(&registry, &zfs) {
                    Ok(summary) => info!(
                        seen = summary.seen,
                        registered = summary.registered,
                        tagged = summary.tagged,
                        "sync pass complete"
                    ),
                    Err(e) => tracing::error!(error = %e, "sync pass failed"),
                }
                std::thread::sleep(Duration::from_secs(config.refresh_interval_secs));
            }
        }
        Command::Sync => {
            let registry = open_registry(&config, true)?;
            let summary = ops::sync_once(&registry, &zfs)?;
            println!(
                "{} datasets seen, {} registered, {} newly tagged",
                summary.seen, summary.registered, summary.tagged
            );
        }
        Command::Tag => {
            let registry = open_registry(&config, true)?;
            let tagged = ops::tag_once(&registry, &zfs)?;
            println!("{tagged} datasets newly tagged");
        }
        Command::List { json } => {
            let inventory = zfs.inventory().context("listing datasets")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&inventory)?);
            } else {
                for dataset in &inventory {
                    let id = dataset
                        .id
                        .map_or_else(|| "-".to_owned(), |id| id.to_string());
                    let policies = dataset.policies.as_ref().map_or(0, std::collections::HashSet::len);
                    println!(
                        "{:<12} {:<40} {:<38} {} policies",
                        dataset.kind, dataset.name, id, policies
                    );
                }
            }
        }
        Command::Pools { json } => {
            let pools = pools().context("listing pools")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&pools)?);
            } else {
                for pool in &pools {
                    println!(
                        "{:<20} {:>6.1}% used  {:?}",
                        pool.name,
                        pool.capacity * 100.0,
                        pool.health
                    );
                }
            }
        }
        Command::Policies { dataset, json } => {
            let registry = open_registry(&config, false)?;
            let policies = ops::stored_policies(&registry, &dataset)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&policies)?);
            } else {
                for policy in &policies {
                    let keep = policy
                        .keep
                        .map_or_else(|| "unlimited".to_owned(), |k| k.to_string());
                    println!(
                        "{}  [{}] every {}s, keep {}",
                        policy.id, policy.label, policy.interval_seconds, keep
                    );
                }
            }
        }
        Command::Snap { dataset, recursive } => {
            let registry = open_registry(&config, true)?;
            let taken = ops::snap_dataset(&registry, &zfs, &config, &dataset, recursive)?;
            println!("{taken} snapshots taken for {dataset}");
        }
        Command::Prune { target, yes } => {
            if !yes {
                bail!("prune removes the identity and its policy store permanently; re-run with --yes");
            }
            let registry = open_registry(&config, true)?;
            if ops::prune_target(&registry, &target)? {
                println!("pruned {target}");
            } else {
                println!("nothing to prune for {target}");
            }
        }
    }

    Ok(())
}

fn open_registry(config: &Config, acquire_lock: bool) -> Result<IdentityRegistry> {
    IdentityRegistry::open(&config.data_dir, acquire_lock)
        .with_context(|| format!("opening registry at {}", config.data_dir.display()))
}
