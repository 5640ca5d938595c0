//! Sync command

use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use tracing::{error, info, warn};

use syncimg_core::notify::{Notifier, RunStatus, StatusFileNotifier};
use syncimg_core::source::{CatalogHistory, CatalogSource, GpgVerifier, load_catalog};
use syncimg_core::{DefaultTransport, Engine, EngineOptions, ShellRunner, TracingReporter};

use crate::SyncArgs;

/// Run one sync pass. Exits with failure when any error was counted.
pub fn sync(args: &SyncArgs) -> Result<ExitCode> {
    let config = super::load_config(args.config.as_deref())?;
    let reporter = TracingReporter;
    let transport = DefaultTransport::new().context("Failed to build HTTP client")?;

    let source = CatalogSource::from_location(&config.host_url)?;
    let location = source.location();
    let verifier = config
        .gpg_validate
        .then(|| GpgVerifier::new(&config.gpg_keyring));
    let catalog = load_catalog(transport.http(), &source, verifier.as_ref(), &reporter)
        .with_context(|| format!("Failed to load catalog {location}"))?;

    let history = config.history_log.as_ref().map(CatalogHistory::new);
    let unchanged = match &history {
        Some(history) => !history.is_new(&location, catalog.manifest_serial())?,
        None => false,
    };
    if unchanged {
        if !args.force {
            info!("Catalog {location} has not changed since the last run; use --force to sync anyway");
            return Ok(ExitCode::SUCCESS);
        }
        info!("Catalog {location} has not changed, syncing anyway");
    }

    let status = RunStatus::begin(Utc::now());
    let mut options = EngineOptions::new(Local::now().date_naive());
    options.dry_run = args.dry_run;
    options.ignore_cache = args.no_cache;
    if options.dry_run {
        warn!("Dry run: nothing will be downloaded, published or unpublished");
    }

    let runner = ShellRunner::default();
    let mut engine = Engine::new(&config, &catalog, &transport, &runner, &reporter, options);
    let report = engine.run().context("Sync aborted")?;

    for distro in &report.distros {
        info!(
            "{} {}: {} published, {} de-registered, {} already registered, {} error(s)",
            distro.distro,
            distro.stream,
            distro.published,
            distro.deregistered,
            distro.skipped,
            distro.errors
        );
    }

    let status = status.finish(
        Utc::now(),
        report.published(),
        report.deregistered(),
        report.skipped(),
        report.errors(),
    );
    if let Some(path) = &args.status_file {
        StatusFileNotifier::new(path)
            .notify(&status)
            .context("Failed to write status file")?;
    }

    if report.errors() > 0 {
        error!("Run {} finished with {} error(s)", status.run_id, report.errors());
        return Ok(ExitCode::FAILURE);
    }

    // Only a clean, real run marks the catalog as handled
    if let Some(history) = history.filter(|_| !args.dry_run) {
        history
            .record(&location, catalog.manifest_serial())
            .context("Failed to update catalog history")?;
    }
    info!("Run {} passed", status.run_id);
    Ok(ExitCode::SUCCESS)
}
