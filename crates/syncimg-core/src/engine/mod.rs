//! Image lifecycle engine.
//!
//! Per distro the engine walks the catalog builds that survive retention,
//! decides per architecture whether to process (see [`decide`]), fetches and
//! runs the per-file pipeline (check, customize, queue for publishing), then
//! publishes the queue in one batch and finally retires builds the ledger
//! holds beyond the keep rules.

mod deregister;
mod publish;

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use chrono::NaiveDate;
use syncimg_schema::{ALL_TAGS, ArchBuild, Build, Catalog, FileDescriptor};

use crate::cache::ContentCache;
use crate::command::{CommandOutput, CommandRunner, Invocation};
use crate::config::{Config, SuiteConfig};
use crate::error::SyncError;
use crate::fetch::{self, FetchOptions, FetchRequest, Transport};
use crate::ledger::{Ledger, LedgerStore};
use crate::listing::RemoteListing;
use crate::reporter::Reporter;
use crate::template::{CommandTemplate, SubstitutionContext};

/// Marker a customize command prints before the path of the file to publish
/// instead of the downloaded one.
pub const EMITTED_FILE_MARKER: &str = "::EMITTED-FILE::";

/// What to do with one architecture of a build, from the remote listing and
/// the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Listed remotely and recorded locally.
    AlreadyPublished,
    /// Listed remotely but not recorded: someone else registered it.
    PublishedElsewhere,
    /// Recorded locally but not listed remotely. Processed again; the new
    /// registration merges into the existing ledger record.
    Drift,
    /// Neither listed nor recorded.
    Process,
}

impl Decision {
    /// Whether the architecture goes through the pipeline.
    pub fn should_process(self) -> bool {
        matches!(self, Self::Drift | Self::Process)
    }
}

/// Reconcile the remote listing with the ledger for one architecture.
pub fn decide(remote_listed: bool, locally_recorded: bool) -> Decision {
    match (remote_listed, locally_recorded) {
        (true, true) => Decision::AlreadyPublished,
        (true, false) => Decision::PublishedElsewhere,
        (false, true) => Decision::Drift,
        (false, false) => Decision::Process,
    }
}

/// Per-run switches.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Simulate fetches and registrations; run no check, customize, publish
    /// or unpublish commands and write no ledger.
    pub dry_run: bool,
    /// Download even when the cache holds the content.
    pub ignore_cache: bool,
    /// Value of the `date` placeholder.
    pub today: NaiveDate,
}

impl EngineOptions {
    /// A real run with the cache enabled.
    pub fn new(today: NaiveDate) -> Self {
        Self {
            dry_run: false,
            ignore_cache: false,
            today,
        }
    }
}

/// Counters for one distro.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistroReport {
    pub distro: String,
    pub stream: String,
    /// Files registered by the publish command.
    pub published: usize,
    /// Builds unpublished and removed from the ledger.
    pub deregistered: usize,
    /// Architectures skipped because they are already registered.
    pub skipped: usize,
    /// Failures counted against the run.
    pub errors: usize,
}

/// Counters for a whole run, one entry per distro processed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub distros: Vec<DistroReport>,
}

impl RunReport {
    /// Errors across all distros.
    pub fn errors(&self) -> usize {
        self.distros.iter().map(|d| d.errors).sum()
    }

    /// Files published across all distros.
    pub fn published(&self) -> usize {
        self.distros.iter().map(|d| d.published).sum()
    }

    /// Builds retired across all distros.
    pub fn deregistered(&self) -> usize {
        self.distros.iter().map(|d| d.deregistered).sum()
    }

    /// Architectures skipped across all distros.
    pub fn skipped(&self) -> usize {
        self.distros.iter().map(|d| d.skipped).sum()
    }

    /// Report for `distro`, if it was processed.
    pub fn distro(&self, distro: &str) -> Option<&DistroReport> {
        self.distros.iter().find(|d| d.distro == distro)
    }
}

/// A file waiting for the publish pass.
#[derive(Debug, Clone)]
struct QueuedFile {
    build_serial: String,
    release_tag: String,
    arch: String,
    local: PathBuf,
    /// Local copies written while fetching; removed when the build retires.
    downloads: Vec<PathBuf>,
    logs: Vec<PathBuf>,
    publish_log: PathBuf,
    context: SubstitutionContext,
}

/// Where a file's pipeline ended.
enum FileStep {
    /// Not fetched (no checksum or no mirror).
    Skipped,
    /// Fetched, nothing else to do (mirror-only or not a publish type).
    Done(Vec<PathBuf>),
    CheckFailed,
    Queue(Box<QueuedFile>),
}

pub struct Engine<'a> {
    config: &'a Config,
    catalog: &'a Catalog,
    transport: &'a dyn Transport,
    runner: &'a dyn CommandRunner,
    reporter: &'a dyn Reporter,
    cache: ContentCache,
    ledger: LedgerStore,
    options: EngineOptions,
}

impl fmt::Debug for Engine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("cache", &self.cache)
            .field("ledger", &self.ledger)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<'a> Engine<'a> {
    /// Build an engine over `catalog`. The download cache is loaded from
    /// `download_log` and the ledger lives at `reg_log`.
    pub fn new(
        config: &'a Config,
        catalog: &'a Catalog,
        transport: &'a dyn Transport,
        runner: &'a dyn CommandRunner,
        reporter: &'a dyn Reporter,
        options: EngineOptions,
    ) -> Self {
        Self {
            config,
            catalog,
            transport,
            runner,
            reporter,
            cache: ContentCache::load(&config.download_log, reporter),
            ledger: LedgerStore::new(&config.reg_log),
            options,
        }
    }

    /// Download cache as updated by the run so far.
    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    /// Registration ledger the engine records into.
    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    /// Process every selected distro of the catalog.
    ///
    /// Failures inside a distro are counted in its report. An error is only
    /// returned when the ledger cannot be written.
    pub fn run(&mut self) -> Result<RunReport, SyncError> {
        let started = Instant::now();
        let mut report = RunReport::default();
        let catalog = self.catalog;

        for distro in catalog.distros() {
            if !self.config.suite_included(distro) {
                self.reporter
                    .info(0, &format!("Skipping {distro}: not in configured suites"));
                continue;
            }
            let suite = self.config.for_distro(distro)?;
            if !catalog.has_stream(distro, &suite.stream) {
                self.reporter.info(
                    0,
                    &format!("Skipping {distro}: no {} stream in catalog", suite.stream),
                );
                continue;
            }
            report.distros.push(self.sync_distro(&suite)?);
        }

        self.reporter.summary(
            report.published(),
            "published",
            started.elapsed().as_secs_f64(),
        );
        Ok(report)
    }

    /// Publish and retire builds of one distro.
    pub fn sync_distro(&mut self, suite: &SuiteConfig) -> Result<DistroReport, SyncError> {
        let distro = suite.distro.as_str();
        let stream = suite.stream.as_str();
        let mut report = DistroReport {
            distro: distro.to_string(),
            stream: stream.to_string(),
            ..DistroReport::default()
        };
        self.reporter.section(0, &format!("{distro} {stream}"));

        let base = SubstitutionContext::new(distro, stream, self.options.today);
        let listing = self.remote_listing(suite, &base, &mut report);
        let ledger = self.ledger.read(self.reporter);

        let catalog = self.catalog;
        let builds = catalog.builds_for(distro, stream, ALL_TAGS);
        self.reporter
            .info(1, &format!("Found {} build(s) for {distro} {stream}", builds.len()));
        let keep = self.keep_set(suite, &builds);

        let mut queue = Vec::new();
        for build in builds {
            self.reporter.info(
                1,
                &format!(
                    "Build {} ({}), arches: {}",
                    build.build_serial,
                    build.release_tag,
                    build.arches.keys().map(String::as_str).collect::<Vec<_>>().join(" ")
                ),
            );

            if !keep.contains(&(build.release_tag.as_str(), build.build_serial.as_str())) {
                self.reporter
                    .info(2, "Skipped: excluded by max_dailies or max_milestones");
                continue;
            }
            if !suite.keep_pre_release && build.release_tag.is_pre_release() {
                self.reporter.info(2, "Skipped: pre-release builds are not kept");
                continue;
            }

            let ctx = base
                .clone()
                .with_build(&build.build_serial, build.release_tag.as_str());
            for (arch, arch_build) in &build.arches {
                self.process_arch(
                    suite,
                    build,
                    arch,
                    arch_build,
                    &ctx,
                    &listing,
                    &ledger,
                    &mut queue,
                    &mut report,
                );
            }
        }

        self.publish_queue(suite, queue, &mut report)?;
        self.deregister(suite, &base, &mut report)?;
        Ok(report)
    }

    /// Builds that survive retention, as `(tag, serial)` pairs.
    fn keep_set<'b>(&self, suite: &SuiteConfig, builds: &[&'b Build]) -> BTreeSet<(&'b str, &'b str)> {
        let mut keep = BTreeSet::new();
        for tag in self.catalog.release_tags(&suite.distro, &suite.stream) {
            let serials: Vec<String> = builds
                .iter()
                .filter(|b| b.release_tag == *tag)
                .map(|b| b.build_serial.clone())
                .collect();
            let kept = suite.retention.keep(tag, &serials);
            self.reporter.info(
                1,
                &format!(
                    "{tag}: {} serial(s), keeping {} under {}: {}",
                    serials.len(),
                    kept.len(),
                    suite.retention.rule_for(tag),
                    kept.join(" ")
                ),
            );
            for build in builds.iter().filter(|b| b.release_tag == *tag) {
                if kept.contains(&build.build_serial) {
                    keep.insert((build.release_tag.as_str(), build.build_serial.as_str()));
                }
            }
        }
        keep
    }

    /// Run `list_cmd`. Without one nothing is listed; a command that cannot
    /// be run counts as an error and lists everything.
    fn remote_listing(
        &self,
        suite: &SuiteConfig,
        base: &SubstitutionContext,
        report: &mut DistroReport,
    ) -> RemoteListing {
        let Some(list) = &suite.commands.list else {
            self.reporter
                .info(1, "No list command configured; assuming nothing is registered");
            return RemoteListing::default();
        };

        self.reporter
            .info(1, &format!("Checking registrations for {}", suite.distro));
        let script = list.render(base);
        let invocation = Invocation {
            name: "list",
            script: &script,
            log_path: None,
        };
        let listing = match self.runner.run(&invocation) {
            Ok(out) => RemoteListing::parse(&out.stdout),
            Err(e) => {
                self.reporter
                    .error(1, &format!("{e}; assuming everything is registered"));
                report.errors += 1;
                return RemoteListing::unavailable(&e.to_string());
            }
        };

        for line in listing.malformed_lines() {
            self.reporter
                .warning(1, &format!("Unexpected list output: {line:?}"));
        }
        if listing.is_malformed() {
            self.reporter.warning(
                1,
                "List command output is not <tag> <build_serial> <arch>; assuming everything is registered",
            );
        }
        listing
    }

    #[allow(clippy::too_many_arguments)]
    fn process_arch(
        &mut self,
        suite: &SuiteConfig,
        build: &Build,
        arch: &str,
        arch_build: &ArchBuild,
        ctx: &SubstitutionContext,
        listing: &RemoteListing,
        ledger: &Ledger,
        queue: &mut Vec<QueuedFile>,
        report: &mut DistroReport,
    ) {
        let tag = build.release_tag.as_str();
        let serial = build.build_serial.as_str();
        self.reporter.info(2, &format!("Arch {arch}"));

        if !suite.handles_arch(arch) {
            self.reporter.info(3, "Not configured for processing; skipping");
            return;
        }

        let decision = decide(
            listing.is_listed(tag, serial, arch),
            ledger.is_recorded(serial, arch, &suite.distro, &suite.stream, tag),
        );
        match decision {
            Decision::AlreadyPublished => {
                self.reporter.info(3, "Already registered; skipping");
                report.skipped += 1;
                return;
            }
            Decision::PublishedElsewhere => {
                self.reporter
                    .warning(3, "Image was registered outside of this tool; skipping");
                report.skipped += 1;
                return;
            }
            Decision::Drift => {
                self.reporter.warning(
                    3,
                    "Ledger records this image as registered but the list command does not; re-processing",
                );
            }
            Decision::Process => self.reporter.info(3, "Cleared for processing"),
        }

        let first = suite.first_types();
        if first.is_empty() {
            self.reporter.info(3, "No file types declared for checking");
        } else {
            self.reporter
                .info(3, &format!("Fetching [{}] first for checking", first.join(" ")));
        }
        let wanted = (!first.is_empty()).then_some(first.as_slice());
        let ctx = ctx.clone().with_arch(arch, arch_build.build_id.as_deref());

        let mut queued: Vec<QueuedFile> = Vec::new();
        let mut fetched = Vec::new();
        for file in arch_build.files_for(wanted, suite.unpacked) {
            if !suite.wants_type(&file.file_type) {
                continue;
            }
            match self.process_file(suite, build, arch, file, &ctx) {
                Ok(FileStep::Queue(q)) => queued.push(*q),
                Ok(FileStep::Done(downloads)) => fetched.extend(downloads),
                Ok(FileStep::Skipped) => {}
                Ok(FileStep::CheckFailed) => {
                    self.reporter
                        .info(4, "Check rejected this build; no further processing");
                    return;
                }
                Err(e) => {
                    self.reporter.error(
                        4,
                        &format!("{e}; processing of {serial} {arch} is aborted, other builds continue"),
                    );
                    report.errors += 1;
                    return;
                }
            }
        }
        if let Some(first) = queued.first_mut() {
            first.downloads.extend(fetched);
        }
        queue.extend(queued);
    }

    fn process_file(
        &mut self,
        suite: &SuiteConfig,
        build: &Build,
        arch: &str,
        file: &FileDescriptor,
        ctx: &SubstitutionContext,
    ) -> Result<FileStep, SyncError> {
        self.reporter.info(3, &format!("File {} ({})", file.path, file.file_type));

        let Some(expected) = file.checksum() else {
            self.reporter
                .warning(4, "No usable checksum in catalog; skipping file");
            return Ok(FileStep::Skipped);
        };
        let Some(url) = self.catalog.file_url(&file.path) else {
            self.reporter.warning(4, "Catalog names no transfer mirror; skipping file");
            return Ok(FileStep::Skipped);
        };

        let rel = relative(&file.path)?;
        let target = self.config.sync_dir.join(rel);
        let pristine = self.config.pristine_dir().map(|p| p.join(rel));
        self.reporter.info(4, &format!("Expected {}: {expected}", expected.kind()));

        let request = FetchRequest::new(&url, &expected, &target).with_pristine(pristine.as_deref());
        let options = FetchOptions {
            simulate: self.options.dry_run,
            ignore_cache: self.options.ignore_cache,
        };
        let fetched = fetch::fetch(
            self.transport,
            &mut self.cache,
            &request,
            options,
            self.reporter,
            4,
        )?;

        let mut ctx = ctx
            .clone()
            .with_file(file, &fetched.local_path, pristine.as_deref());
        let downloads: Vec<PathBuf> = std::iter::once(target).chain(pristine).collect();
        let mut logs = Vec::new();

        if suite.is_check_type(&file.file_type) {
            if let Some(check) = &suite.commands.check {
                let log = self.log_path(rel, ".check-log.txt");
                let out = self.run_command("check", check, &ctx, &log)?;
                logs.push(log);
                if !out.success() {
                    return Ok(FileStep::CheckFailed);
                }
            }
        }

        if suite.is_mirror_only(arch) {
            self.reporter.info(4, "Mirror-only architecture; done");
            return Ok(FileStep::Done(downloads));
        }

        let mut local = fetched.local_path;
        if suite.is_customize_type(&file.file_type) {
            if let Some(custom) = &suite.commands.customize {
                let log = self.log_path(rel, ".customization.log");
                let out = self
                    .run_command("customize", custom, &ctx, &log)?
                    .ensure_success("customize")?;
                logs.push(log);
                if let Some(emitted) = out
                    .last_line()
                    .and_then(|l| l.strip_prefix(EMITTED_FILE_MARKER))
                {
                    local = PathBuf::from(emitted.trim());
                    ctx.set_local(&local);
                    self.reporter
                        .info(4, &format!("Customize emitted {}", local.display()));
                }
            }
        }

        if !suite.is_publish_type(&file.file_type) {
            return Ok(FileStep::Done(downloads));
        }

        self.reporter.info(4, "Queued for publishing");
        Ok(FileStep::Queue(Box::new(QueuedFile {
            build_serial: build.build_serial.clone(),
            release_tag: build.release_tag.as_str().to_string(),
            arch: arch.to_string(),
            local,
            downloads,
            logs,
            publish_log: self.log_path(rel, ".publish-log.txt"),
            context: ctx,
        })))
    }

    /// Render and run a command, logging to `log`. In a dry run nothing is
    /// executed and the command reports success.
    fn run_command(
        &self,
        name: &str,
        template: &CommandTemplate,
        ctx: &SubstitutionContext,
        log: &Path,
    ) -> Result<CommandOutput, SyncError> {
        if self.options.dry_run {
            self.reporter.info(4, &format!("Simulated {name} command"));
            return Ok(CommandOutput {
                code: Some(0),
                ..CommandOutput::default()
            });
        }

        self.reporter.info(4, &format!("Running {name} command, log {}", log.display()));
        let script = template.render(ctx);
        let out = self.runner.run(&Invocation {
            name,
            script: &script,
            log_path: Some(log),
        })?;
        if out.success() {
            self.reporter.success(4, &format!("{name} complete"));
        } else {
            self.reporter.warning(4, &format!("{name} failed with {:?}", out.code));
        }
        Ok(out)
    }

    fn log_path(&self, rel: &Path, suffix: &str) -> PathBuf {
        let mut path = self.config.process_logs.join(rel).into_os_string();
        path.push(suffix);
        PathBuf::from(path)
    }
}

/// Catalog paths are relative to the mirror root. A leading slash is
/// dropped; anything that could resolve outside the local roots is refused.
fn relative(path: &str) -> Result<&Path, SyncError> {
    let rel = Path::new(path.trim_start_matches('/'));
    let mut normal = false;
    for component in rel.components() {
        match component {
            Component::Normal(_) => normal = true,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(SyncError::UnsafePath(path.to_string()));
            }
        }
    }
    if normal {
        Ok(rel)
    } else {
        Err(SyncError::UnsafePath(path.to_string()))
    }
}
