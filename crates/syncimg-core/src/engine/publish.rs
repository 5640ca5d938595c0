//! The publish pass.

use std::collections::BTreeMap;

use crate::command::Invocation;
use crate::config::SuiteConfig;
use crate::error::SyncError;
use crate::ledger::LedgerRecord;
use crate::template::Placeholder;

use super::{DistroReport, Engine, QueuedFile};

/// Optional prefix before the four registration fields.
const REGISTERED_PREFIX: &str = "REGISTERED:";

/// Identity a publish command reports for what it registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub release_tag: String,
    pub build_serial: String,
    pub arch: String,
    pub id: String,
}

impl Registration {
    /// Parse `[REGISTERED:] <tag> <build_serial> <arch> <registration_id>`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let line = line.strip_prefix(REGISTERED_PREFIX).unwrap_or(line);
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [tag, serial, arch, id] => Some(Self {
                release_tag: (*tag).to_string(),
                build_serial: (*serial).to_string(),
                arch: (*arch).to_string(),
                id: (*id).to_string(),
            }),
            _ => None,
        }
    }

    fn matches(&self, file: &QueuedFile) -> bool {
        self.release_tag == file.release_tag
            && self.build_serial == file.build_serial
            && self.arch == file.arch
    }
}

impl Engine<'_> {
    /// Run the publish command for every queued file and commit successful
    /// registrations to the ledger in one write.
    ///
    /// A failing command skips that file. A reported identity that does not
    /// match the file stops the rest of the batch.
    pub(super) fn publish_queue(
        &mut self,
        suite: &SuiteConfig,
        queue: Vec<QueuedFile>,
        report: &mut DistroReport,
    ) -> Result<(), SyncError> {
        if queue.is_empty() {
            return Ok(());
        }
        self.reporter
            .section(1, &format!("Publishing {} image(s) for {}", queue.len(), suite.distro));

        let mut records: BTreeMap<(String, String), LedgerRecord> = BTreeMap::new();
        let mut published = 0;

        for file in queue {
            self.reporter
                .info(2, &format!("Publishing {}", file.local.display()));

            let registration = if self.options.dry_run {
                self.reporter.info(3, "Simulated publishing");
                Registration {
                    release_tag: file.release_tag.clone(),
                    build_serial: file.build_serial.clone(),
                    arch: file.arch.clone(),
                    id: format!("FAKE-{}_{}", file.build_serial, file.arch),
                }
            } else {
                let Some(line) = self.run_publish(suite, &file, report) else {
                    continue;
                };
                match Registration::parse(&line) {
                    Some(r) => r,
                    None => Registration {
                        release_tag: String::new(),
                        build_serial: String::new(),
                        arch: String::new(),
                        id: line,
                    },
                }
            };

            let record = records
                .entry((file.release_tag.clone(), file.build_serial.clone()))
                .or_insert_with(|| {
                    LedgerRecord::new(
                        &suite.distro,
                        &suite.stream,
                        &file.release_tag,
                        &file.build_serial,
                    )
                });
            let mut logs = file.logs.clone();
            logs.push(file.publish_log.clone());
            record.add(&file.arch, &file.local, logs);
            record.add_downloads(&file.arch, file.downloads.iter().cloned());
            if let Some(build_id) = file.context.value(Placeholder::BuildId) {
                record.set_attribute(&file.arch, "build_id", build_id);
            }

            if registration.matches(&file) {
                self.reporter
                    .success(3, &format!("Registered as {}", registration.id));
                record.set_registration(&file.arch, Some(registration.id), true);
                published += 1;
            } else {
                record.set_registration(&file.arch, None, false);
                let err = SyncError::RegistrationMismatch {
                    expected: format!("{} {} {}", file.release_tag, file.build_serial, file.arch),
                    reported: format!(
                        "{} {} {} {}",
                        registration.release_tag,
                        registration.build_serial,
                        registration.arch,
                        registration.id
                    )
                    .trim()
                    .to_string(),
                };
                self.reporter
                    .error(3, &format!("{err}; aborting the rest of this batch"));
                report.errors += 1;
                break;
            }
        }

        report.published += published;
        self.reporter
            .info(2, &format!("Published/registered {published} image(s)"));

        if published == 0 {
            return Ok(());
        }
        if self.options.dry_run {
            self.reporter
                .info(2, "Dry run: registrations are not recorded");
            return Ok(());
        }

        self.reporter.info(
            2,
            &format!("Recording registrations to {}", self.ledger.path().display()),
        );
        self.ledger.record(records.into_values(), self.reporter)?;
        Ok(())
    }

    /// Run `publish_cmd` for `file`; the last line of its output on success.
    fn run_publish(
        &self,
        suite: &SuiteConfig,
        file: &QueuedFile,
        report: &mut DistroReport,
    ) -> Option<String> {
        let Some(publish) = &suite.commands.publish else {
            self.reporter
                .warning(3, "No publish command configured; skipping");
            return None;
        };

        let script = publish.render(&file.context);
        let result = self.runner.run(&Invocation {
            name: "publish",
            script: &script,
            log_path: Some(&file.publish_log),
        });
        match result.and_then(|out| out.ensure_success("publish")) {
            Ok(out) => {
                let line = out.last_line().unwrap_or_default().to_string();
                self.reporter
                    .info(3, &format!("Registration returned: {line}"));
                Some(line)
            }
            Err(e) => {
                self.reporter.error(
                    3,
                    &format!("{e}; publishing of this image is aborted, others continue"),
                );
                report.errors += 1;
                None
            }
        }
    }
}
