//! Command-line interface.
//!
//! ```bash
//! # Stage exact duplicates under ~/Pictures and review them in the browser
//! dupetriage ~/Pictures
//!
//! # Near-duplicates by perceptual hash, at most 8 differing bits
//! dupetriage ~/Pictures --mode phash --threshold 8
//!
//! # Show the staging plan without moving anything
//! dupetriage ~/Pictures --dry-run -v
//! ```
//!
//! Running again on the same root resumes the groups left in the decision
//! folder instead of scanning.

use std::path::PathBuf;

use clap::Parser;

use crate::duplicates::DetectionMode;

/// Find duplicate and near-duplicate images, stage them into groups and
/// decide which copies to keep from a local web page.
#[derive(Debug, Parser)]
#[command(name = "dupetriage")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory tree to scan
    #[arg(value_name = "ROOT")]
    pub root: PathBuf,

    /// Where groups are staged for review [default: ROOT/_DECISION_DUPES]
    #[arg(long, value_name = "PATH")]
    pub decision_folder: Option<PathBuf>,

    /// Detection mode [default: exact, or the mode of a resumed run]
    #[arg(short, long, value_enum)]
    pub mode: Option<DetectionMode>,

    /// Maximum Hamming distance for perceptual modes (0-64)
    ///
    /// Ignored in exact mode.
    #[arg(short, long, value_name = "BITS")]
    pub threshold: Option<u32>,

    /// Consider every regular file, not only known image extensions
    #[arg(long)]
    pub include_all: bool,

    /// Skip hidden files and directories (starting with .)
    #[arg(long)]
    pub skip_hidden: bool,

    /// Log the staging plan and stop without touching any file
    #[arg(long)]
    pub dry_run: bool,

    /// Move rejected files to the system trash instead of deleting them
    #[arg(long)]
    pub trash: bool,

    /// Review server host
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,

    /// Review server port (0 picks a free port)
    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Threads used for hashing and fingerprinting
    #[arg(long, value_name = "N")]
    pub io_threads: Option<usize>,

    /// Settings file (TOML) [default: platform config dir]
    #[arg(long, value_name = "FILE", env = "DUPETRIAGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Print fatal errors as JSON on stderr
    #[arg(long)]
    pub json_errors: bool,
}
