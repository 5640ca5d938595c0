//! The deregistration pass.
//!
//! Recorded builds outside the keep rules are unpublished. Local files and
//! the ledger record are only removed after the unpublish command reported
//! success. Only files the record lists are deleted, and only inside
//! `sync_dir` or the pristine directory; a file another record still lists
//! is left alone.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use syncimg_schema::ReleaseTag;

use crate::command::Invocation;
use crate::config::SuiteConfig;
use crate::error::SyncError;
use crate::ledger::LedgerRecord;
use crate::template::{CommandTemplate, SubstitutionContext};

use super::{DistroReport, Engine};

impl Engine<'_> {
    pub(super) fn deregister(
        &self,
        suite: &SuiteConfig,
        base: &SubstitutionContext,
        report: &mut DistroReport,
    ) -> Result<(), SyncError> {
        let ledger = self.ledger.read(self.reporter);

        for tag in ledger.release_tags(&suite.distro, &suite.stream) {
            self.reporter.section(
                1,
                &format!("De-registrations for {} {} tagged {tag}", suite.distro, suite.stream),
            );
            let Some(unpublish) = &suite.commands.unpublish else {
                self.reporter
                    .info(2, "Skipping: no unpublish command configured");
                continue;
            };

            let records = ledger.bucket(&suite.distro, &suite.stream, tag);
            let mut serials: Vec<String> = records.iter().map(|r| r.build_serial.clone()).collect();
            serials.sort();
            serials.dedup();

            let release_tag = ReleaseTag::parse(tag);
            let retire = suite.retention.retire(&release_tag, &serials);
            self.reporter.info(
                2,
                &format!(
                    "Rule {}: keeping {} of {} serial(s)",
                    suite.retention.rule_for(&release_tag),
                    serials.len() - retire.len(),
                    serials.len()
                ),
            );
            if retire.is_empty() {
                self.reporter.info(2, "No images to de-register");
                continue;
            }
            self.reporter
                .info(2, &format!("De-registering: {}", retire.join(" ")));

            for record in records.iter().filter(|r| retire.contains(&r.build_serial)) {
                let protected = ledger.paths_outside(record);
                if self.retire(unpublish, base, record, &protected, report)? {
                    report.deregistered += 1;
                }
            }
        }
        Ok(())
    }

    /// Unpublish one record, then purge its files and drop it from the
    /// ledger. Returns whether all three happened.
    fn retire(
        &self,
        unpublish: &CommandTemplate,
        base: &SubstitutionContext,
        record: &LedgerRecord,
        protected: &BTreeSet<&Path>,
        report: &mut DistroReport,
    ) -> Result<bool, SyncError> {
        self.reporter.info(
            3,
            &format!(
                "De-registration of {} {} {}",
                record.distro, record.stream, record.build_serial
            ),
        );
        if self.options.dry_run {
            self.reporter
                .info(4, "Dry run: not unpublishing, purging or removing the record");
            return Ok(false);
        }

        let log = self.deregistration_log(record);
        let ctx = base
            .clone()
            .with_build(&record.build_serial, &record.release_tag);
        let script = unpublish.render(&ctx);
        let result = self.runner.run(&Invocation {
            name: "unpublish",
            script: &script,
            log_path: Some(&log),
        });
        if let Err(e) = result.and_then(|out| out.ensure_success("unpublish")) {
            self.reporter
                .error(4, &format!("{e}; not proceeding with cleanup"));
            report.errors += 1;
            return Ok(false);
        }
        self.reporter.success(4, "Unpublished");

        let mut roots = vec![self.config.sync_dir.as_path()];
        roots.extend(self.config.pristine.as_deref());
        match record.purge(&roots, protected) {
            Ok(removed) if removed.is_empty() => {
                self.reporter.info(4, "No local files left to purge");
            }
            Ok(removed) => {
                for path in &removed {
                    self.reporter.info(5, &format!("Removed {}", path.display()));
                }
                self.reporter
                    .info(4, &format!("Purged {} local file(s)", removed.len()));
            }
            Err(e) => {
                self.reporter.error(
                    4,
                    &format!("Failed to delete local files: {e}; keeping the ledger record"),
                );
                report.errors += 1;
                return Ok(false);
            }
        }

        if self.ledger.remove(record, self.reporter)? {
            self.reporter.success(4, "De-registration complete");
        } else {
            self.reporter
                .warning(4, "Ledger record was already gone");
        }
        Ok(true)
    }

    fn deregistration_log(&self, record: &LedgerRecord) -> PathBuf {
        self.config.process_logs.join("deregistration").join(format!(
            "{}-{}-{}-{}.log.txt",
            record.distro, record.stream, record.build_serial, record.release_tag
        ))
    }
}
