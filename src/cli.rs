//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use sourcekit_core::failure::DEFAULT_MAX_RETRIES;

/// Browse content sites through one uniform adapter protocol.
///
/// Every command prints JSON on stdout; logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "sourcekit")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/sourcekit/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Netscape cookie file loaded before and saved after the command
    #[arg(long, global = true)]
    pub cookies: Option<PathBuf>,

    /// Deadline for the whole operation in seconds (1-3600)
    #[arg(short = 't', long, global = true, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub timeout: Option<u64>,

    /// Requests per window for origins without a site budget (0 disables limiting)
    #[arg(long, global = true, value_parser = clap::value_parser!(u32).range(0..=100))]
    pub rate_limit_permits: Option<u32>,

    /// Rate limit window in milliseconds (1-60000)
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..=60000))]
    pub rate_limit_window_ms: Option<u64>,

    /// User-Agent sent by the shared transport
    #[arg(long, global = true)]
    pub user_agent: Option<String>,

    /// Maximum attempts for transient failures (1-10)
    #[arg(short = 'r', long, global = true, default_value_t = DEFAULT_MAX_RETRIES, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub max_retries: u32,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// List registered sources
    Sources,

    /// Print a source's filter schema in its default state
    Filters {
        /// Source id (see `sources`)
        source: String,
    },

    /// Popularity listing
    Popular(ListingArgs),

    /// Latest-updates listing
    Latest(ListingArgs),

    /// Search by text and filters
    Search {
        #[command(flatten)]
        listing: ListingArgs,

        /// Free-text query; `id:<value>` looks an item up directly where supported
        #[arg(default_value = "")]
        query: String,

        /// Filter parameter as key=value (option ids, repeatable)
        #[arg(short = 'f', long = "filter", value_parser = parse_key_value)]
        filters: Vec<(String, String)>,
    },

    /// Details of one item
    Details(ItemArgs),

    /// Chapters of one item
    Chapters(ItemArgs),

    /// Pages of one chapter
    Pages {
        #[command(flatten)]
        item: ItemArgs,

        /// Also resolve every page into final media locators
        #[arg(long)]
        resolve: bool,
    },
}

#[derive(ClapArgs, Debug, PartialEq, Eq)]
pub struct ListingArgs {
    /// Source id (see `sources`)
    pub source: String,

    /// 1-based page number
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub page: u32,
}

#[derive(ClapArgs, Debug, PartialEq, Eq)]
pub struct ItemArgs {
    /// Source id (see `sources`)
    pub source: String,

    /// Origin-relative locator as returned by a listing
    pub locator: String,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}
