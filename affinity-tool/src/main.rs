//! Affinity Tool - CLI for the affinity recommendation engine
//!
//! # Commands
//!
//! - `run` - Refresh on a schedule until interrupted
//! - `refresh` - Run a single refresh cycle and print its report
//! - `fetch` - Print the cached output of one user
//! - `audit` - Check cache coverage for the users of a vote feed
//! - `snapshot-info` - Describe a warm-restart snapshot
//!
//! Vote and item feeds are JSON-lines files, one object per line:
//!
//! ```text
//! {"user": 1, "item": 10, "vote": 1, "timestamp": 1700000000.0}
//! {"item": 10, "timestamp": 1700000000.0}
//! ```
//!
//! # Examples
//!
//! ```bash
//! affinity-tool -c engine.json refresh --votes votes.jsonl --items items.jsonl --cache ./cache --full
//! affinity-tool fetch --cache ./cache --user 42
//! ```

mod engine_ops;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use affinity_core::UserId;
use engine_ops::Sources;

#[derive(Parser)]
#[command(name = "affinity-tool")]
#[command(version, about = "CLI for the affinity recommendation engine")]
#[command(after_help = "Use 'affinity-tool <command> --help' for more information.")]
struct Cli {
    /// Engine configuration (JSON). Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SourceArgs {
    /// JSON-lines vote feed
    #[arg(short, long)]
    votes: PathBuf,

    /// JSON-lines recent item feed
    #[arg(short, long)]
    items: PathBuf,

    /// Directory of the file-backed cache
    #[arg(long = "cache", default_value = "./cache")]
    cache_dir: PathBuf,

    /// Warm-restart snapshot (overrides the configuration)
    #[arg(short, long)]
    snapshot: Option<PathBuf>,
}

impl SourceArgs {
    fn into_parts(self) -> (Sources, Option<PathBuf>) {
        let sources = Sources {
            votes: self.votes,
            items: self.items,
            cache_dir: self.cache_dir,
        };
        (sources, self.snapshot)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh on a schedule until Ctrl-C
    Run {
        #[command(flatten)]
        sources: SourceArgs,

        /// Seconds between incremental refreshes (overrides the configuration)
        #[arg(long)]
        update_interval: Option<u64>,
    },

    /// Run one refresh cycle
    Refresh {
        #[command(flatten)]
        sources: SourceArgs,

        /// Reload the whole window and recluster
        #[arg(long, default_value = "false")]
        full: bool,

        /// Score cached predictions against the new votes
        #[arg(long, default_value = "false")]
        evaluate: bool,
    },

    /// Print the cached output of a user
    Fetch {
        /// Directory of the file-backed cache
        #[arg(long = "cache", default_value = "./cache")]
        cache_dir: PathBuf,

        #[arg(short, long)]
        user: UserId,
    },

    /// Check which users of a vote feed have a cached output
    Audit {
        /// JSON-lines vote feed
        #[arg(short, long)]
        votes: PathBuf,

        /// Directory of the file-backed cache
        #[arg(long = "cache", default_value = "./cache")]
        cache_dir: PathBuf,
    },

    /// Describe a snapshot file
    #[command(name = "snapshot-info")]
    SnapshotInfo {
        /// Path to the snapshot
        #[arg(short, long)]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("affinity_tool=info".parse()?)
                .add_directive("affinity_core=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Run {
            sources,
            update_interval,
        } => {
            let (sources, snapshot) = sources.into_parts();
            let mut config = engine_ops::load_config(config_path, snapshot).await?;
            if let Some(secs) = update_interval {
                config.schedule.update_interval_secs = secs;
            }
            engine_ops::run(config, sources).await?;
        }
        Commands::Refresh {
            sources,
            full,
            evaluate,
        } => {
            let (sources, snapshot) = sources.into_parts();
            let mut config = engine_ops::load_config(config_path, snapshot).await?;
            config.evaluate |= evaluate;
            engine_ops::refresh(config, sources, full).await?;
        }
        Commands::Fetch { cache_dir, user } => {
            let config = engine_ops::load_config(config_path, None).await?;
            engine_ops::fetch(config, cache_dir, user).await?;
        }
        Commands::Audit { votes, cache_dir } => {
            let config = engine_ops::load_config(config_path, None).await?;
            engine_ops::audit(config, votes, cache_dir).await?;
        }
        Commands::SnapshotInfo { path } => {
            engine_ops::snapshot_info(path).await?;
        }
    }

    Ok(())
}
