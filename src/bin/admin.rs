//! Offline maintenance for a pollwatch store.
//!
//! Takes the store lock, so it cannot run next to a live notifier.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pollwatch::{init_logging, LogConfig, NotifierConfig, Store, StoreConfig, SubscriberId};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect and maintain a pollwatch store", long_about = None)]
struct Args {
    /// Config file; its store settings are used.
    #[arg(short, long, conflicts_with = "store")]
    config: Option<PathBuf>,

    /// Store file, overriding the config.
    #[arg(short, long)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Entity and subscriber counts.
    Stats,
    /// Verify both directions of every relationship.
    Check,
    /// List subscribers and their subscriptions.
    Subscribers,
    /// Clear a subscriber's unreachable status.
    Reset { id: i64 },
    /// Rewrite the store file with live data only.
    Compact,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let (store_config, log_config) = match (&args.store, &args.config) {
        (Some(path), _) => {
            let mut config = StoreConfig::at(path);
            config.create_if_missing = false;
            (config, LogConfig::default())
        }
        (None, Some(path)) => {
            let config = NotifierConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?;
            let mut store = config.store_config();
            store.create_if_missing = false;
            (store, config.log)
        }
        (None, None) => bail!("either --store or --config is required"),
    };
    init_logging(&log_config)?;

    let store = Store::open(store_config).context("opening store")?;

    match args.command {
        Command::Stats => {
            let stats = store.stats()?;
            println!("searches:      {}", stats.search_count);
            println!("accounts:      {}", stats.account_count);
            println!(
                "subscribers:   {} ({} active, {} unreachable)",
                stats.subscriber_count,
                stats.active_subscriber_count,
                stats.unreachable_subscriber_count
            );
            println!("file size:     {} bytes", stats.file_size_bytes);
            println!("live data:     {} bytes", stats.live_size_bytes);
        }
        Command::Check => {
            let problems = store.check_consistency()?;
            if problems.is_empty() {
                println!("ok");
            } else {
                for problem in &problems {
                    println!("{problem}");
                }
                bail!("{} inconsistencies found", problems.len());
            }
        }
        Command::Subscribers => {
            for subscriber in store.list_subscribers()? {
                let status = match (subscriber.started, subscriber.is_unreachable()) {
                    (_, true) => "unreachable",
                    (true, false) => "active",
                    (false, false) => "stopped",
                };
                println!("{} @{} [{}]", subscriber.id, subscriber.username, status);
                for search in &subscriber.searches {
                    println!("  search: {search}");
                }
                for account in &subscriber.submission_accounts {
                    println!("  submissions: {account}");
                }
                for account in &subscriber.journal_accounts {
                    println!("  journals: {account}");
                }
            }
        }
        Command::Reset { id } => {
            if store.reset_delivery(SubscriberId(id))? {
                println!("subscriber {id} is reachable again");
            } else {
                println!("subscriber {id} was not marked unreachable");
            }
        }
        Command::Compact => {
            let (before, after) = store.compact()?;
            println!("compacted {before} -> {after} bytes");
        }
    }

    Ok(())
}
