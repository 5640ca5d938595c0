//! Ledger command

use std::path::Path;

use anyhow::Result;
use syncimg_core::{LedgerStore, TracingReporter};

/// Print one line per recorded build and one indented line per arch.
pub fn ledger(config: Option<&Path>) -> Result<()> {
    let config = super::load_config(config)?;
    let store = LedgerStore::new(&config.reg_log);
    let ledger = store.read(&TracingReporter);

    if ledger.is_empty() {
        println!("No builds recorded in {}", store.path().display());
        return Ok(());
    }

    for record in ledger.records() {
        println!(
            "{} {} {} {} ({})",
            record.distro, record.stream, record.release_tag, record.build_serial, record.id
        );
        for (arch, entry) in &record.arches {
            let registration = entry.registration.as_deref().unwrap_or("unregistered");
            println!("  {arch} {registration} [{} file(s)]", entry.files.len());
        }
    }
    Ok(())
}
