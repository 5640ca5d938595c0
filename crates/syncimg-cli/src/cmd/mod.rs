pub mod default_config;
pub mod files;
pub mod ledger;
pub mod regs;
pub mod sync;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use syncimg_core::config::Config;
use syncimg_core::fetch::HttpTransport;
use syncimg_core::source::{CatalogSource, load_catalog};
use syncimg_core::{TracingReporter, default_config_path};
use syncimg_schema::Catalog;

/// Resolve `--config`, falling back to ~/.syncimg/config.yaml.
fn config_path(config: Option<&Path>) -> Result<PathBuf> {
    match config {
        Some(path) => Ok(path.to_path_buf()),
        None => default_config_path().context("Cannot determine home directory; pass --config"),
    }
}

fn load_config(config: Option<&Path>) -> Result<Config> {
    let path = config_path(config)?;
    Config::load(&path).with_context(|| format!("Failed to load configuration {}", path.display()))
}

/// Read an unverified catalog for the listing commands.
fn read_catalog(location: &str) -> Result<Catalog> {
    let source = CatalogSource::from_location(location)?;
    let http = HttpTransport::new().context("Failed to build HTTP client")?;
    load_catalog(&http, &source, None, &TracingReporter)
        .with_context(|| format!("Failed to load catalog {location}"))
}
