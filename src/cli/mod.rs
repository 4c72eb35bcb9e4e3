pub mod commands;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::config::parse_duration;

#[derive(Parser)]
#[command(name = "freshet")]
#[command(about = "Poll feed resources and keep their items deduplicated", long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.config/freshet/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add a resource to poll
    Add {
        /// URL of the feed
        url: String,

        /// Display title
        #[arg(long)]
        title: Option<String>,

        /// Store the resource without polling it
        #[arg(long)]
        disabled: bool,

        /// Request timeout (e.g. "5s")
        #[arg(long, value_parser = parse_duration)]
        timeout: Option<Duration>,

        /// How long a poll result stays fresh (e.g. "30m", "1h")
        #[arg(long, value_parser = parse_duration)]
        max_age: Option<Duration>,
    },
    /// List resources and their last poll status
    List,
    /// List stored feed items
    Items {
        /// Maximum number of items to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Sort field, prefix with '-' for descending
        #[arg(long, default_value = "-published")]
        order_by: String,
    },
    /// Poll every stale resource once
    Poll {
        #[command(flatten)]
        sweep: SweepArgs,
    },
    /// Poll repeatedly until interrupted
    Watch {
        /// Time between sweeps (e.g. "15m", "1h")
        #[arg(short, long, default_value = "15m", value_parser = parse_duration)]
        interval: Duration,

        #[command(flatten)]
        sweep: SweepArgs,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct SweepArgs {
    /// Maximum number of resources polled at once (default from config)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Treat results younger than this as fresh, for every resource
    #[arg(long, value_parser = parse_duration)]
    pub max_age: Option<Duration>,

    /// Only revalidate, do not parse and store items
    #[arg(long)]
    pub no_ingest: bool,
}
