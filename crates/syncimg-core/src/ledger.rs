//! Registration ledger: which builds this tool has published.
//!
//! Records are grouped `distro -> stream -> release tag -> [record]`. There
//! is at most one record per build serial in a bucket; recording a
//! duplicate merges it into the existing record. The ledger is advisory
//! (the remote listing is authoritative), so a missing or corrupt file is an
//! empty ledger.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reporter::Reporter;
use crate::state::{self, PersistError, StateKind};

/// What was done for one architecture of a build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchEntry {
    /// Files handed to the publish command.
    pub files: Vec<PathBuf>,
    /// Local copies fetched for this architecture, pristine copies included.
    pub downloads: Vec<PathBuf>,
    /// Check, customize and publish logs.
    pub logs: Vec<PathBuf>,
    /// Id reported by the publish command.
    pub registration: Option<String>,
    /// Whether the reported identity matched.
    pub published: bool,
    /// Free-form facts about the registration, such as the catalog build id.
    pub attributes: BTreeMap<String, String>,
}

impl ArchEntry {
    /// A non-empty registration id is recorded.
    pub fn is_registered(&self) -> bool {
        self.registration.as_deref().is_some_and(|r| !r.is_empty())
    }

    fn paths(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().chain(&self.downloads).map(PathBuf::as_path)
    }
}

/// One published build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    /// Stable id; survives merges.
    pub id: Uuid,
    pub distro: String,
    pub stream: String,
    pub release_tag: String,
    pub build_serial: String,
    /// Per-architecture outcome, keyed by arch name.
    pub arches: BTreeMap<String, ArchEntry>,
}

impl LedgerRecord {
    /// An empty record with a fresh id.
    pub fn new(distro: &str, stream: &str, release_tag: &str, build_serial: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            distro: distro.to_string(),
            stream: stream.to_string(),
            release_tag: release_tag.to_string(),
            build_serial: build_serial.to_string(),
            arches: BTreeMap::new(),
        }
    }

    /// Entry for `arch`, created empty if absent.
    pub fn arch_mut(&mut self, arch: &str) -> &mut ArchEntry {
        self.arches.entry(arch.to_string()).or_default()
    }

    /// Append a published file and the logs produced for it.
    pub fn add(&mut self, arch: &str, file: impl Into<PathBuf>, logs: impl IntoIterator<Item = PathBuf>) {
        let entry = self.arch_mut(arch);
        entry.files.push(file.into());
        entry.logs.extend(logs);
    }

    /// Remember local copies fetched for `arch`.
    pub fn add_downloads(&mut self, arch: &str, downloads: impl IntoIterator<Item = PathBuf>) {
        let entry = self.arch_mut(arch);
        for path in downloads {
            if !entry.downloads.contains(&path) {
                entry.downloads.push(path);
            }
        }
    }

    /// Set the registration outcome for `arch`.
    pub fn set_registration(&mut self, arch: &str, registration: Option<String>, published: bool) {
        let entry = self.arch_mut(arch);
        entry.registration = registration;
        entry.published = published;
    }

    /// Store `key = value` on the entry for `arch`.
    pub fn set_attribute(&mut self, arch: &str, key: &str, value: &str) {
        self.arch_mut(arch)
            .attributes
            .insert(key.to_string(), value.to_string());
    }

    /// Whether `arch` carries a registration id.
    pub fn is_registered(&self, arch: &str) -> bool {
        self.arches.get(arch).is_some_and(ArchEntry::is_registered)
    }

    /// Every local path the record names, published files and downloads.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.arches.values().flat_map(ArchEntry::paths)
    }

    /// Fold `other` into `self`. Architectures from `other` replace ours; the
    /// id stays ours.
    pub fn merge(&mut self, other: LedgerRecord) {
        self.arches.extend(other.arches);
    }

    /// Delete the record's own local files and return the ones removed.
    ///
    /// Only paths strictly inside one of `roots` are touched, and never one
    /// listed in `protected`. Directories emptied by the removal are removed
    /// up to, but not including, their root. Files already gone are skipped.
    pub fn purge(&self, roots: &[&Path], protected: &BTreeSet<&Path>) -> io::Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        for path in self.paths() {
            if protected.contains(path) || removed.iter().any(|r| r == path) {
                continue;
            }
            let Some(root) = containing_root(path, roots) else {
                continue;
            };
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            }
            prune_empty_dirs(path, root);
            removed.push(path.to_path_buf());
        }
        Ok(removed)
    }
}

/// The root `path` lies strictly under, if any. Paths with `..` never match.
fn containing_root<'r>(path: &Path, roots: &[&'r Path]) -> Option<&'r Path> {
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return None;
    }
    roots
        .iter()
        .copied()
        .find(|root| path != *root && path.starts_with(root))
}

/// Remove now-empty parents of `path` below `root`; stops at the first
/// directory that still has entries.
fn prune_empty_dirs(path: &Path, root: &Path) {
    let mut dir = path.parent();
    while let Some(current) = dir {
        if current == root || !current.starts_with(root) || fs::remove_dir(current).is_err() {
            break;
        }
        dir = current.parent();
    }
}

type Buckets = BTreeMap<String, BTreeMap<String, BTreeMap<String, Vec<LedgerRecord>>>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    buckets: Buckets,
}

impl Ledger {
    /// Records for one release tag of a distro stream, oldest first.
    pub fn bucket(&self, distro: &str, stream: &str, release_tag: &str) -> &[LedgerRecord] {
        self.buckets
            .get(distro)
            .and_then(|s| s.get(stream))
            .and_then(|t| t.get(release_tag))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Release tags with at least one record for a distro stream.
    pub fn release_tags(&self, distro: &str, stream: &str) -> Vec<&str> {
        self.buckets
            .get(distro)
            .and_then(|s| s.get(stream))
            .map(|t| {
                t.iter()
                    .filter(|(_, records)| !records.is_empty())
                    .map(|(tag, _)| tag.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every record, in bucket order.
    pub fn records(&self) -> impl Iterator<Item = &LedgerRecord> {
        self.buckets
            .values()
            .flat_map(BTreeMap::values)
            .flat_map(BTreeMap::values)
            .flatten()
    }

    pub fn len(&self) -> usize {
        self.records().count()
    }

    pub fn is_empty(&self) -> bool {
        self.records().next().is_none()
    }

    /// Add `record`, merging into an existing record with the same build
    /// serial in the same bucket. Any further duplicates of that serial are
    /// folded in and dropped.
    pub fn insert_or_merge(&mut self, record: LedgerRecord) {
        let bucket = self
            .buckets
            .entry(record.distro.clone())
            .or_default()
            .entry(record.stream.clone())
            .or_default()
            .entry(record.release_tag.clone())
            .or_default();

        let Some(first) = bucket
            .iter()
            .position(|r| r.build_serial == record.build_serial)
        else {
            bucket.push(record);
            return;
        };

        let mut index = first + 1;
        while index < bucket.len() {
            if bucket[index].build_serial == record.build_serial {
                let duplicate = bucket.remove(index);
                bucket[first].merge(duplicate);
            } else {
                index += 1;
            }
        }
        bucket[first].merge(record);
    }

    /// Remove the record with `record.id` from its bucket.
    pub fn remove(&mut self, record: &LedgerRecord) -> bool {
        let Some(bucket) = self
            .buckets
            .get_mut(&record.distro)
            .and_then(|s| s.get_mut(&record.stream))
            .and_then(|t| t.get_mut(&record.release_tag))
        else {
            return false;
        };
        let before = bucket.len();
        bucket.retain(|r| r.id != record.id);
        before != bucket.len()
    }

    /// A record for the serial exists and `arch` is registered in it.
    pub fn is_recorded(
        &self,
        build_serial: &str,
        arch: &str,
        distro: &str,
        stream: &str,
        release_tag: &str,
    ) -> bool {
        self.bucket(distro, stream, release_tag)
            .iter()
            .any(|r| r.build_serial == build_serial && r.is_registered(arch))
    }

    /// Local paths named by any record other than `record`.
    pub fn paths_outside(&self, record: &LedgerRecord) -> BTreeSet<&Path> {
        self.records()
            .filter(|r| r.id != record.id)
            .flat_map(LedgerRecord::paths)
            .collect()
    }
}

/// The ledger file on disk.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current ledger. Missing gives empty; corrupt gives empty with a
    /// warning.
    pub fn read(&self, reporter: &dyn Reporter) -> Ledger {
        match state::load::<Ledger>(&self.path, StateKind::Ledger) {
            Ok(ledger) => ledger.unwrap_or_default(),
            Err(e) => {
                reporter.warning(
                    0,
                    &format!(
                        "Registration ledger {} is unreadable, treating as empty: {e}",
                        self.path.display()
                    ),
                );
                Ledger::default()
            }
        }
    }

    /// Replace the stored ledger.
    pub fn write(&self, ledger: &Ledger) -> Result<(), PersistError> {
        state::save(&self.path, StateKind::Ledger, ledger)
    }

    /// Merge `records` into the stored ledger and write it back.
    pub fn record(
        &self,
        records: impl IntoIterator<Item = LedgerRecord>,
        reporter: &dyn Reporter,
    ) -> Result<Ledger, PersistError> {
        let mut ledger = self.read(reporter);
        for record in records {
            ledger.insert_or_merge(record);
        }
        self.write(&ledger)?;
        Ok(ledger)
    }

    /// Remove `record` by id; the file is only rewritten if it was present.
    pub fn remove(&self, record: &LedgerRecord, reporter: &dyn Reporter) -> Result<bool, PersistError> {
        let mut ledger = self.read(reporter);
        if !ledger.remove(record) {
            return Ok(false);
        }
        self.write(&ledger)?;
        Ok(true)
    }

    /// [`Ledger::is_recorded`] against the stored ledger.
    pub fn is_recorded(
        &self,
        build_serial: &str,
        arch: &str,
        distro: &str,
        stream: &str,
        release_tag: &str,
        reporter: &dyn Reporter,
    ) -> bool {
        self.read(reporter)
            .is_recorded(build_serial, arch, distro, stream, release_tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::NullReporter;

    fn registered(serial: &str, arch: &str, id: &str) -> LedgerRecord {
        let mut r = LedgerRecord::new("precise", "server", "daily", serial);
        r.add(arch, format!("/srv/{serial}/{arch}.img"), Vec::new());
        r.set_registration(arch, Some(id.to_string()), true);
        r
    }

    #[test]
    fn merge_keeps_every_arch_and_survivor_id() {
        let mut ledger = Ledger::default();
        let first = registered("20240101", "amd64", "ami-1");
        let survivor = first.id;
        ledger.insert_or_merge(first);
        ledger.insert_or_merge(registered("20240101", "i386", "ami-2"));
        ledger.insert_or_merge(registered("20240101", "amd64", "ami-3"));

        let bucket = ledger.bucket("precise", "server", "daily");
        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket[0].id, survivor);
        assert_eq!(bucket[0].arches.len(), 2);
        assert_eq!(
            bucket[0].arches["amd64"].registration.as_deref(),
            Some("ami-3")
        );
    }

    #[test]
    fn is_recorded_requires_registration() {
        let mut ledger = Ledger::default();
        let mut r = LedgerRecord::new("precise", "server", "daily", "20240101");
        r.set_registration("amd64", None, false);
        r.set_registration("i386", Some(String::new()), false);
        ledger.insert_or_merge(r);
        ledger.insert_or_merge(registered("20240102", "amd64", "ami-1"));

        assert!(!ledger.is_recorded("20240101", "amd64", "precise", "server", "daily"));
        assert!(!ledger.is_recorded("20240101", "i386", "precise", "server", "daily"));
        assert!(ledger.is_recorded("20240102", "amd64", "precise", "server", "daily"));
        assert!(!ledger.is_recorded("20240102", "amd64", "precise", "server", "release"));
    }

    #[test]
    fn remove_by_id() {
        let mut ledger = Ledger::default();
        let record = registered("20240101", "amd64", "ami-1");
        ledger.insert_or_merge(record.clone());
        let stranger = registered("20240101", "amd64", "ami-1");

        assert!(!ledger.remove(&stranger));
        assert!(ledger.remove(&record));
        assert!(ledger.is_empty());
        assert!(!ledger.remove(&record));
    }

    #[test]
    fn store_round_trip_and_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::new(dir.path().join("ledger.bin"));
        assert!(store.read(&NullReporter).is_empty());

        let record = registered("20240101", "amd64", "ami-1");
        store.record([record.clone()], &NullReporter).unwrap();
        assert!(store.is_recorded("20240101", "amd64", "precise", "server", "daily", &NullReporter));

        assert!(store.remove(&record, &NullReporter).unwrap());
        assert!(!store.remove(&record, &NullReporter).unwrap());

        std::fs::write(store.path(), b"junk").unwrap();
        assert!(store.read(&NullReporter).is_empty());
    }

    #[test]
    fn purge_removes_only_own_files_inside_roots() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        let flat = data.join("precise");
        std::fs::create_dir_all(&flat).unwrap();
        let old = flat.join("amd64-20240101.img");
        let new = flat.join("amd64-20240102.img");
        let outside = dir.path().join("custom.img");
        for path in [&old, &new, &outside] {
            std::fs::write(path, b"x").unwrap();
        }

        let mut record = LedgerRecord::new("precise", "server", "daily", "20240101");
        record.add("amd64", &outside, Vec::new());
        record.add_downloads("amd64", [old.clone(), new.clone()]);
        let mut kept = LedgerRecord::new("precise", "server", "daily", "20240102");
        kept.add("amd64", &new, Vec::new());

        let mut ledger = Ledger::default();
        ledger.insert_or_merge(record.clone());
        ledger.insert_or_merge(kept);
        let protected = ledger.paths_outside(&record);

        let removed = record.purge(&[data.as_path()], &protected).unwrap();
        assert_eq!(removed, vec![old.clone()]);
        assert!(!old.exists());
        assert!(new.exists());
        assert!(outside.exists());
        assert!(flat.exists());

        assert!(record.purge(&[data.as_path()], &protected).unwrap().is_empty());
    }

    #[test]
    fn purge_prunes_emptied_directories_but_never_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        let file = data.join("precise/20240101/amd64.img");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, b"x").unwrap();
        let escaping = data.join("../loose.img");
        std::fs::write(dir.path().join("loose.img"), b"x").unwrap();

        let mut record = LedgerRecord::new("precise", "server", "daily", "20240101");
        record.add("amd64", &file, Vec::new());
        record.add_downloads("amd64", [escaping, data.clone()]);

        let removed = record.purge(&[data.as_path()], &BTreeSet::new()).unwrap();
        assert_eq!(removed, vec![file]);
        assert!(!data.join("precise").exists());
        assert!(data.exists());
        assert!(dir.path().join("loose.img").exists());
    }
}
