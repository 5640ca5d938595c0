//! syncimg - cloud image catalog sync
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! Mirrors build artifacts from a published catalog, runs site commands to
//! check, customize and publish them, and retires registrations that fall
//! outside the configured keep rules.
//!
//! # Layout
//!
//! ```text
//! ~/.syncimg/
//! └── config.yaml   # used when --config is not given
//! ```
//!
//! Everything else (mirror directory, ledger, download cache, logs) lives
//! where the configuration file says.

pub mod cmd;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub use syncimg_core::paths::*;

#[derive(Debug, Parser)]
#[command(name = "syncimg")]
#[command(author, version, about = "syncimg - mirror and publish cloud images from a build catalog")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Mirror, check, publish and retire images as configured
    Sync(SyncArgs),
    /// List catalog files of a distro
    Files(FilesArgs),
    /// List cloud registrations recorded in the catalog
    Regs(RegsArgs),
    /// Show builds recorded in the registration ledger
    Ledger {
        /// Configuration file (default: ~/.syncimg/config.yaml)
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// Print the built-in configuration
    #[command(name = "default-config")]
    DefaultConfig,
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    /// Configuration file (default: ~/.syncimg/config.yaml)
    #[arg(long, short)]
    pub config: Option<PathBuf>,
    /// Show what would happen without downloading, publishing or unpublishing
    #[arg(long)]
    pub dry_run: bool,
    /// Download even when a cached copy exists
    #[arg(long)]
    pub no_cache: bool,
    /// Run even if the catalog has not changed since the last run
    #[arg(long, short)]
    pub force: bool,
    /// Write the run status as JSON to this file
    #[arg(long)]
    pub status_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct FilesArgs {
    /// Catalog URL or file
    #[arg(long)]
    pub catalog: String,
    /// Distro code name (e.g. precise)
    #[arg(long, short)]
    pub distro: String,
    #[arg(long, default_value = "server")]
    pub stream: String,
    /// Release tag (daily, release, beta, ...)
    #[arg(long)]
    pub tag: Option<String>,
    /// Architectures; repeatable, `all` matches everything
    #[arg(long, short)]
    pub arch: Vec<String>,
    /// Only these file types
    #[arg(long)]
    pub include: Vec<String>,
    /// Never these file types
    #[arg(long, conflicts_with = "include")]
    pub exclude: Vec<String>,
    /// One build serial instead of the newest
    #[arg(long, conflicts_with = "all")]
    pub serial: Option<String>,
    /// Every build instead of the newest
    #[arg(long)]
    pub all: bool,
    /// Include unpacked files
    #[arg(long)]
    pub unpacked: bool,
}

#[derive(Debug, Args)]
pub struct RegsArgs {
    /// Catalog URL or file
    #[arg(long)]
    pub catalog: String,
    /// Distro code name (e.g. precise)
    #[arg(long, short)]
    pub distro: String,
    #[arg(long, default_value = "server")]
    pub stream: String,
    /// Release tag (daily, release, beta, ...)
    #[arg(long)]
    pub tag: Option<String>,
    #[arg(long, short)]
    pub arch: Option<String>,
    /// Cloud name (case-insensitive)
    #[arg(long)]
    pub cloud: Option<String>,
    /// Instance type (case-insensitive)
    #[arg(long)]
    pub instance_type: Option<String>,
    #[arg(long)]
    pub region: Option<String>,
    /// Every build instead of the newest
    #[arg(long)]
    pub all_builds: bool,
    /// Print rows as JSON
    #[arg(long)]
    pub json: bool,
}
