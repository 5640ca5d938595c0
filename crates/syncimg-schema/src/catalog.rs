//! Build catalog model.
//!
//! The catalog is a JSON document listing, per distro code name and stream,
//! every published build with its per-architecture file lists and cloud
//! registrations:
//!
//! ```json
//! {
//!   "catalog": [
//!     { "distro_code_name": "precise",
//!       "build_types": { "server": [ { "build_serial": "20120101", ... } ] } }
//!   ],
//!   "mirrors": { "transfer": ["http://cloud-images.ubuntu.com"] },
//!   "manifest": { "serial": 1325376000 }
//! }
//! ```
//!
//! Every entity is decoded into a typed record. Fields this crate does not
//! know about are preserved in an `extra` map on the nearest entity.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::ALL_TAGS;
use crate::hash::Checksum;
use crate::tag::ReleaseTag;

/// Errors raised while decoding a catalog document.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// The document is not valid JSON or a section has the wrong shape.
    #[error("Malformed catalog: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A required top-level section is absent.
    #[error("Malformed catalog: missing required section '{0}'")]
    MissingSection(&'static str),

    /// A build entry could not be decoded.
    #[error("Malformed catalog: build #{index} of {distro}/{stream}: {source}")]
    InvalidBuild {
        /// Distro code name.
        distro: String,
        /// Stream name.
        stream: String,
        /// Position of the build within its stream.
        index: usize,
        /// Underlying decode error.
        source: serde_json::Error,
    },

    /// The same file path appears twice in one architecture build.
    #[error("Malformed catalog: {distro}/{stream} build {build_serial} {arch} lists {path} twice")]
    DuplicatePath {
        /// Distro code name.
        distro: String,
        /// Stream name.
        stream: String,
        /// Serial of the offending build.
        build_serial: String,
        /// Architecture whose file list repeats the path.
        arch: String,
        /// The repeated path.
        path: String,
    },

    /// Two builds of a stream share a release tag and build serial.
    #[error("Malformed catalog: {distro}/{stream} has build {build_serial} tagged {release_tag} twice")]
    DuplicateSerial {
        /// Distro code name.
        distro: String,
        /// Stream name.
        stream: String,
        /// Release tag both builds carry.
        release_tag: String,
        /// The repeated serial.
        build_serial: String,
    },
}

/// One artifact of an architecture build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Path relative to a transfer mirror.
    pub path: String,
    /// Type tag used as the policy dispatch key (`tar.gz`, `manifest`, ...).
    pub file_type: String,
    /// SHA1 hex digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    /// SHA512 hex digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha512: Option<String>,
    /// Free text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Unrecognised fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl FileDescriptor {
    /// Expected checksum: the SHA1 when present and valid, else the SHA512.
    pub fn checksum(&self) -> Option<Checksum> {
        self.sha1
            .as_deref()
            .and_then(|s| Checksum::sha1(s).ok())
            .or_else(|| self.sha512.as_deref().and_then(|s| Checksum::sha512(s).ok()))
    }

    /// Whether this is an "unpacked" variant (path contains `/unpacked/`).
    pub fn is_unpacked(&self) -> bool {
        self.path.contains("/unpacked/")
    }

    /// Final path component.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Registration of an image in one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionRegistration {
    /// Region name, e.g. `us-east-1`.
    pub region_name: String,
    /// Published image id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_id: Option<String>,
    /// Ramdisk id, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ramdisk_id: Option<String>,
    /// Unrecognised fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Instance type with its per-region registrations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceType {
    /// Instance type name, e.g. `ebs` or `instance-store`.
    pub name: String,
    /// Name the image was registered under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_name: Option<String>,
    /// Per-region registrations.
    #[serde(default)]
    pub registrations: Vec<RegionRegistration>,
    /// Unrecognised fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl InstanceType {
    /// Registration in `region`, if any.
    pub fn region(&self, region: &str) -> Option<&RegionRegistration> {
        self.registrations.iter().find(|r| r.region_name == region)
    }
}

/// Registrations of an architecture build with one cloud.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudRegistration {
    /// Cloud name, e.g. `ec2`.
    pub name: String,
    /// Instance types registered with this cloud.
    #[serde(default)]
    pub instance_types: Vec<InstanceType>,
    /// Unrecognised fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Artifacts and registrations of one architecture within a build.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ArchBuild {
    /// Upstream build id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<String>,
    /// Files in document order.
    #[serde(default)]
    pub file_list: Vec<FileDescriptor>,
    /// Cloud registrations.
    #[serde(default)]
    pub cloud_registrations: Vec<CloudRegistration>,
    /// Unrecognised fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ArchBuild {
    /// Files in two-phase order.
    ///
    /// With `wanted` set, files whose type is in `wanted` come first, then
    /// the rest. Paths under `/unpacked/` are skipped unless
    /// `include_unpacked`.
    pub fn files_for<'a>(
        &'a self,
        wanted: Option<&'a [String]>,
        include_unpacked: bool,
    ) -> impl Iterator<Item = &'a FileDescriptor> + 'a {
        let visible = move |f: &&FileDescriptor| include_unpacked || !f.is_unpacked();
        let is_wanted =
            move |f: &FileDescriptor| wanted.is_some_and(|w| w.iter().any(|t| *t == f.file_type));

        let first = self
            .file_list
            .iter()
            .filter(visible)
            .filter(move |f| is_wanted(*f));
        let rest = self
            .file_list
            .iter()
            .filter(visible)
            .filter(move |f| !is_wanted(*f));
        first.chain(rest)
    }

    /// First packed file of `file_type`.
    pub fn file_of_type(&self, file_type: &str) -> Option<&FileDescriptor> {
        self.file_list
            .iter()
            .find(|f| f.file_type == file_type && !f.is_unpacked())
    }

    /// First path listed more than once, if any.
    pub fn repeated_path(&self) -> Option<&str> {
        let mut seen = BTreeSet::new();
        self.file_list
            .iter()
            .map(|f| f.path.as_str())
            .find(|path| !seen.insert(*path))
    }

    /// Registrations with cloud `name`.
    pub fn cloud(&self, name: &str) -> Option<&CloudRegistration> {
        self.cloud_registrations.iter().find(|c| c.name == name)
    }
}

/// One build of a distro stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
    /// Sortable build identifier, e.g. `20120101` or `20120101.1`.
    pub build_serial: String,
    /// Release classification.
    pub release_tag: ReleaseTag,
    /// Architecture name to its artifacts.
    #[serde(default)]
    pub arches: BTreeMap<String, ArchBuild>,
    /// Unrecognised fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Selection of registration rows; every `None` matches anything.
///
/// Cloud and instance type compare case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct RegistrationFilter {
    /// Release tag, or `None` for all tags.
    pub release_tag: Option<String>,
    /// Architecture.
    pub arch: Option<String>,
    /// Cloud name.
    pub cloud: Option<String>,
    /// Instance type name.
    pub instance_type: Option<String>,
    /// Region name.
    pub region: Option<String>,
    /// Consider only the newest build of the selection.
    pub latest_only: bool,
}

/// Flattened registration: build, architecture, cloud, instance type and
/// region on one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationRow {
    /// Build serial.
    pub build_serial: String,
    /// Release tag.
    pub release_tag: String,
    /// Architecture.
    pub arch: String,
    /// Cloud name.
    pub cloud: String,
    /// Instance type name.
    pub instance_type: String,
    /// Region name.
    pub region: String,
    /// Published image id.
    pub published_id: Option<String>,
    /// Ramdisk id.
    pub ramdisk_id: Option<String>,
    /// Registered image name.
    pub registered_name: Option<String>,
    /// Mirror URL of the build's `tar.gz` artifact.
    pub path: Option<String>,
    /// SHA1 of that artifact.
    pub sha1: Option<String>,
}

/// Selection for [`Catalog::file_listing`].
#[derive(Debug, Clone, Default)]
pub struct FileQuery {
    /// Release tag, or `None` for all tags.
    pub release_tag: Option<String>,
    /// Architectures; empty or containing `all` matches every arch.
    pub arches: Vec<String>,
    /// When non-empty, only these file types are listed.
    pub included: Vec<String>,
    /// File types never listed (ignored when `included` is set).
    pub excluded: Vec<String>,
    /// Restrict to one build serial.
    pub serial: Option<String>,
    /// List every build rather than only the newest.
    pub all_serials: bool,
    /// Include `/unpacked/` paths.
    pub include_unpacked: bool,
}

/// A file selected by [`Catalog::file_listing`].
#[derive(Debug, Clone, PartialEq)]
pub struct ListedFile<'a> {
    /// Build serial the file belongs to.
    pub build_serial: &'a str,
    /// Architecture the file belongs to.
    pub arch: &'a str,
    /// The file.
    pub file: &'a FileDescriptor,
    /// Full mirror URL, when the catalog names a mirror.
    pub url: Option<String>,
}

#[derive(Deserialize)]
struct RawDistro {
    distro_code_name: String,
    #[serde(default)]
    build_types: BTreeMap<String, Vec<Value>>,
}

#[derive(Deserialize)]
struct RawMirrors {
    #[serde(default)]
    transfer: Vec<String>,
}

/// Parsed catalog document.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    distro_order: Vec<String>,
    streams: BTreeMap<String, BTreeMap<String, Vec<Build>>>,
    mirrors_transfer: Vec<String>,
    manifest_serial: Option<u64>,
    /// Unrecognised top-level sections.
    pub extra: BTreeMap<String, Value>,
}

impl Catalog {
    /// Decode a catalog document.
    ///
    /// # Errors
    ///
    /// Fails when the document is not JSON, when `catalog` or `mirrors` is
    /// missing, or when any build cannot be decoded. A stream holding two
    /// builds with the same release tag and serial, or an architecture
    /// listing the same path twice, is also rejected.
    pub fn parse(bytes: &[u8]) -> Result<Self, CatalogError> {
        let mut root: BTreeMap<String, Value> = serde_json::from_slice(bytes)?;

        let entries = root
            .remove("catalog")
            .ok_or(CatalogError::MissingSection("catalog"))?;
        let mirrors = root
            .remove("mirrors")
            .ok_or(CatalogError::MissingSection("mirrors"))?;
        let manifest_serial = root
            .get("manifest")
            .and_then(|m| m.get("serial"))
            .and_then(serial_number);

        let entries: Vec<RawDistro> = serde_json::from_value(entries)?;
        let mirrors: RawMirrors = serde_json::from_value(mirrors)?;

        let mut catalog = Self {
            mirrors_transfer: mirrors.transfer,
            manifest_serial,
            extra: root,
            ..Self::default()
        };

        for entry in entries {
            let distro = entry.distro_code_name;
            if !catalog.streams.contains_key(&distro) {
                catalog.distro_order.push(distro.clone());
            }
            let streams = catalog.streams.entry(distro.clone()).or_default();
            for (stream, raw_builds) in entry.build_types {
                let mut builds = Vec::with_capacity(raw_builds.len());
                let mut serials = BTreeSet::new();
                for (index, raw) in raw_builds.into_iter().enumerate() {
                    let build: Build =
                        serde_json::from_value(raw).map_err(|source| CatalogError::InvalidBuild {
                            distro: distro.clone(),
                            stream: stream.clone(),
                            index,
                            source,
                        })?;
                    if !serials.insert((build.release_tag.as_str().to_string(), build.build_serial.clone())) {
                        return Err(CatalogError::DuplicateSerial {
                            distro,
                            stream,
                            release_tag: build.release_tag.as_str().to_string(),
                            build_serial: build.build_serial,
                        });
                    }
                    let repeated = build
                        .arches
                        .iter()
                        .find_map(|(arch, a)| a.repeated_path().map(|path| (arch, path)));
                    if let Some((arch, path)) = repeated {
                        return Err(CatalogError::DuplicatePath {
                            distro,
                            stream,
                            build_serial: build.build_serial.clone(),
                            arch: arch.clone(),
                            path: path.to_string(),
                        });
                    }
                    builds.push(build);
                }
                streams.insert(stream, builds);
            }
        }

        Ok(catalog)
    }

    /// Distro code names in document order.
    pub fn distros(&self) -> impl Iterator<Item = &str> {
        self.distro_order.iter().map(String::as_str)
    }

    /// Streams published for `distro`.
    pub fn streams(&self, distro: &str) -> Vec<&str> {
        self.streams
            .get(distro)
            .map(|s| s.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Whether the catalog has `stream` for `distro`.
    pub fn has_stream(&self, distro: &str, stream: &str) -> bool {
        self.streams
            .get(distro)
            .is_some_and(|s| s.contains_key(stream))
    }

    /// Builds of a distro stream in document order. `release_tag` of `all`
    /// matches every tag.
    pub fn builds_for(&self, distro: &str, stream: &str, release_tag: &str) -> Vec<&Build> {
        self.streams
            .get(distro)
            .and_then(|s| s.get(stream))
            .map(|builds| {
                builds
                    .iter()
                    .filter(|b| release_tag == ALL_TAGS || b.release_tag.as_str() == release_tag)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Distinct release tags of a distro stream, in order of first appearance.
    pub fn release_tags(&self, distro: &str, stream: &str) -> Vec<&ReleaseTag> {
        self.release_tag_counts(distro, stream)
            .into_iter()
            .map(|(tag, _)| tag)
            .collect()
    }

    /// Number of builds per release tag, in order of first appearance.
    pub fn release_tag_counts(&self, distro: &str, stream: &str) -> Vec<(&ReleaseTag, usize)> {
        let mut counts: Vec<(&ReleaseTag, usize)> = Vec::new();
        for build in self.builds_for(distro, stream, ALL_TAGS) {
            match counts.iter_mut().find(|(t, _)| **t == build.release_tag) {
                Some((_, n)) => *n += 1,
                None => counts.push((&build.release_tag, 1)),
            }
        }
        counts
    }

    /// Transfer mirror base URLs.
    pub fn mirrors_transfer(&self) -> &[String] {
        &self.mirrors_transfer
    }

    /// Catalog epoch from `manifest.serial`.
    pub fn manifest_serial(&self) -> Option<u64> {
        self.manifest_serial
    }

    /// URL of `path` on the first transfer mirror.
    pub fn file_url(&self, path: &str) -> Option<String> {
        self.mirrors_transfer.first().map(|base| {
            format!(
                "{}/{}",
                base.trim_end_matches('/'),
                path.trim_start_matches('/')
            )
        })
    }

    /// Flattened cloud registrations of a distro stream.
    pub fn registrations(
        &self,
        distro: &str,
        stream: &str,
        filter: &RegistrationFilter,
    ) -> Vec<RegistrationRow> {
        let tag = filter.release_tag.as_deref().unwrap_or(ALL_TAGS);
        let mut builds = self.builds_for(distro, stream, tag);
        if filter.latest_only {
            builds = latest(&builds).into_iter().collect();
        }

        let eq = |want: &Option<String>, have: &str| {
            want.as_deref()
                .is_none_or(|w| w.eq_ignore_ascii_case(have))
        };

        let mut rows = Vec::new();
        for build in builds {
            for (arch, arch_build) in &build.arches {
                if filter.arch.as_deref().is_some_and(|a| a != arch.as_str()) {
                    continue;
                }
                let artifact = arch_build.file_of_type("tar.gz");
                for cloud in &arch_build.cloud_registrations {
                    if !eq(&filter.cloud, &cloud.name) {
                        continue;
                    }
                    for itype in &cloud.instance_types {
                        if !eq(&filter.instance_type, &itype.name) {
                            continue;
                        }
                        for reg in &itype.registrations {
                            if filter.region.as_deref().is_some_and(|r| r != reg.region_name) {
                                continue;
                            }
                            rows.push(RegistrationRow {
                                build_serial: build.build_serial.clone(),
                                release_tag: build.release_tag.to_string(),
                                arch: arch.clone(),
                                cloud: cloud.name.clone(),
                                instance_type: itype.name.clone(),
                                region: reg.region_name.clone(),
                                published_id: reg.published_id.clone(),
                                ramdisk_id: reg.ramdisk_id.clone(),
                                registered_name: itype.registered_name.clone(),
                                path: artifact.and_then(|f| self.file_url(&f.path)),
                                sha1: artifact.and_then(|f| f.sha1.clone()),
                            });
                        }
                    }
                }
            }
        }
        rows
    }

    /// Files of a distro stream matching `query`.
    ///
    /// Without `serial` or `all_serials`, only the newest build is listed.
    pub fn file_listing(&self, distro: &str, stream: &str, query: &FileQuery) -> Vec<ListedFile<'_>> {
        let tag = query.release_tag.as_deref().unwrap_or(ALL_TAGS);
        let builds = self.builds_for(distro, stream, tag);
        let newest = latest(&builds).map(|b| b.build_serial.as_str());

        let all_arches = query.arches.is_empty() || query.arches.iter().any(|a| a == ALL_TAGS);

        let mut listed = Vec::new();
        for build in builds {
            let selected = match &query.serial {
                Some(serial) => *serial == build.build_serial,
                None => query.all_serials || Some(build.build_serial.as_str()) == newest,
            };
            if !selected {
                continue;
            }
            for (arch, arch_build) in &build.arches {
                if !all_arches && !query.arches.iter().any(|a| a == arch) {
                    continue;
                }
                for file in arch_build.files_for(None, query.include_unpacked) {
                    let keep = if query.included.is_empty() {
                        !query.excluded.contains(&file.file_type)
                    } else {
                        query.included.contains(&file.file_type)
                    };
                    if keep {
                        listed.push(ListedFile {
                            build_serial: &build.build_serial,
                            arch,
                            file,
                            url: self.file_url(&file.path),
                        });
                    }
                }
            }
        }
        listed
    }
}

/// Build with the greatest serial.
pub fn latest<'a>(builds: &[&'a Build]) -> Option<&'a Build> {
    builds.iter().copied().max_by(|a, b| a.build_serial.cmp(&b.build_serial))
}

/// The `n` builds with the greatest serials, ascending by serial.
pub fn newest_n<'a>(builds: &[&'a Build], n: usize) -> Vec<&'a Build> {
    let mut sorted = builds.to_vec();
    sorted.sort_by(|a, b| a.build_serial.cmp(&b.build_serial));
    let skip = sorted.len().saturating_sub(n);
    sorted.split_off(skip)
}

fn serial_number(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA1_A: &str = "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed";

    fn sample() -> Catalog {
        let doc = serde_json::json!({
            "format": "query:1.0",
            "mirrors": { "transfer": ["http://mirror.example/"] },
            "manifest": { "serial": "1325376000" },
            "catalog": [{
                "distro_code_name": "precise",
                "build_types": {
                    "server": [
                        {
                            "build_serial": "20120102",
                            "release_tag": "daily",
                            "arches": {
                                "amd64": {
                                    "build_id": "b2",
                                    "file_list": [
                                        { "path": "precise/20120102/disk.tar.gz", "file_type": "tar.gz", "sha1": SHA1_A },
                                        { "path": "precise/20120102/unpacked/kernel", "file_type": "kernel", "sha1": SHA1_A },
                                        { "path": "precise/20120102/disk.manifest", "file_type": "manifest", "sha1": SHA1_A, "size": 12 }
                                    ],
                                    "cloud_registrations": [{
                                        "name": "ec2",
                                        "instance_types": [{
                                            "name": "ebs",
                                            "registered_name": "ubuntu-precise-daily",
                                            "registrations": [
                                                { "region_name": "us-east-1", "published_id": "ami-1" },
                                                { "region_name": "eu-west-1", "published_id": "ami-2" }
                                            ]
                                        }]
                                    }]
                                }
                            }
                        },
                        { "build_serial": "20120101", "release_tag": "daily", "arches": {} },
                        { "build_serial": "20111201", "release_tag": "beta-2", "arches": {} }
                    ]
                }
            }]
        });
        Catalog::parse(doc.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn parse_collects_top_level_sections() {
        let cat = sample();
        assert_eq!(cat.distros().collect::<Vec<_>>(), vec!["precise"]);
        assert_eq!(cat.streams("precise"), vec!["server"]);
        assert_eq!(cat.manifest_serial(), Some(1_325_376_000));
        assert!(cat.extra.contains_key("format"));
        assert_eq!(
            cat.file_url("/a/b.img").as_deref(),
            Some("http://mirror.example/a/b.img")
        );
    }

    #[test]
    fn parse_requires_catalog_and_mirrors() {
        let err = Catalog::parse(br#"{"catalog": []}"#).unwrap_err();
        assert!(matches!(err, CatalogError::MissingSection("mirrors")));

        let err = Catalog::parse(br#"{"mirrors": {"transfer": []}}"#).unwrap_err();
        assert!(matches!(err, CatalogError::MissingSection("catalog")));

        assert!(matches!(
            Catalog::parse(b"not json").unwrap_err(),
            CatalogError::Malformed(_)
        ));
    }

    #[test]
    fn parse_rejects_undecodable_arches() {
        let doc = br#"{
            "mirrors": {"transfer": []},
            "catalog": [{"distro_code_name": "precise", "build_types": {"server": [
                {"build_serial": "1", "release_tag": "daily", "arches": {"amd64": {"file_list": 7}}}
            ]}}]
        }"#;
        let err = Catalog::parse(doc).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidBuild { index: 0, .. }));
    }

    #[test]
    fn parse_rejects_repeated_serial_within_a_tag() {
        let doc = br#"{
            "mirrors": {"transfer": []},
            "catalog": [{"distro_code_name": "precise", "build_types": {"server": [
                {"build_serial": "20120101", "release_tag": "daily", "arches": {}},
                {"build_serial": "20120101", "release_tag": "release", "arches": {}},
                {"build_serial": "20120101", "release_tag": "daily", "arches": {}}
            ]}}]
        }"#;
        let err = Catalog::parse(doc).unwrap_err();
        match err {
            CatalogError::DuplicateSerial {
                distro,
                stream,
                release_tag,
                build_serial,
            } => {
                assert_eq!(
                    (distro.as_str(), stream.as_str(), release_tag.as_str(), build_serial.as_str()),
                    ("precise", "server", "daily", "20120101")
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn parse_rejects_repeated_path_within_an_arch() {
        let doc = serde_json::json!({
            "mirrors": {"transfer": []},
            "catalog": [{"distro_code_name": "precise", "build_types": {"server": [
                {"build_serial": "20120101", "release_tag": "daily", "arches": {
                    "amd64": {"file_list": [
                        {"path": "precise/disk.img", "file_type": "disk1.img", "sha1": SHA1_A}
                    ]},
                    "i386": {"file_list": [
                        {"path": "precise/disk.img", "file_type": "disk1.img", "sha1": SHA1_A},
                        {"path": "precise/disk.img", "file_type": "manifest", "sha1": SHA1_A}
                    ]}
                }}
            ]}}]
        });
        let err = Catalog::parse(doc.to_string().as_bytes()).unwrap_err();
        match err {
            CatalogError::DuplicatePath { arch, path, build_serial, .. } => {
                assert_eq!(arch, "i386");
                assert_eq!(path, "precise/disk.img");
                assert_eq!(build_serial, "20120101");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn builds_keep_document_order() {
        let cat = sample();
        let serials: Vec<_> = cat
            .builds_for("precise", "server", ALL_TAGS)
            .iter()
            .map(|b| b.build_serial.as_str())
            .collect();
        assert_eq!(serials, vec!["20120102", "20120101", "20111201"]);

        let daily = cat.builds_for("precise", "server", "daily");
        assert_eq!(daily.len(), 2);
        assert!(cat.builds_for("oneiric", "server", ALL_TAGS).is_empty());
    }

    #[test]
    fn latest_and_newest_n_sort_by_serial() {
        let cat = sample();
        let builds = cat.builds_for("precise", "server", ALL_TAGS);
        assert_eq!(latest(&builds).unwrap().build_serial, "20120102");

        let two: Vec<_> = newest_n(&builds, 2)
            .iter()
            .map(|b| b.build_serial.as_str())
            .collect();
        assert_eq!(two, vec!["20120101", "20120102"]);
        assert_eq!(newest_n(&builds, 10).len(), 3);
        assert!(latest(&[]).is_none());
    }

    #[test]
    fn files_for_puts_wanted_types_first() {
        let cat = sample();
        let build = cat.builds_for("precise", "server", "daily")[0];
        let amd64 = &build.arches["amd64"];

        let wanted = vec!["manifest".to_string()];
        let types: Vec<_> = amd64
            .files_for(Some(wanted.as_slice()), false)
            .map(|f| f.file_type.as_str())
            .collect();
        assert_eq!(types, vec!["manifest", "tar.gz"]);

        let all: Vec<_> = amd64
            .files_for(None, true)
            .map(|f| f.file_type.as_str())
            .collect();
        assert_eq!(all, vec!["tar.gz", "kernel", "manifest"]);
    }

    #[test]
    fn unknown_file_fields_are_preserved() {
        let cat = sample();
        let build = cat.builds_for("precise", "server", "daily")[0];
        let manifest = build.arches["amd64"].file_of_type("manifest").unwrap();
        assert_eq!(manifest.extra.get("size"), Some(&serde_json::json!(12)));
        assert_eq!(manifest.checksum().unwrap().as_str(), SHA1_A);
        assert_eq!(manifest.file_name(), "disk.manifest");
    }

    #[test]
    fn checksum_falls_back_to_sha512() {
        let sha512 = "a".repeat(128);
        let file = FileDescriptor {
            path: "x".into(),
            file_type: "tar.gz".into(),
            sha1: None,
            sha512: Some(sha512.clone()),
            description: None,
            extra: BTreeMap::new(),
        };
        let sum = file.checksum().unwrap();
        assert_eq!(sum.kind(), crate::HashType::Sha512);

        let bare = FileDescriptor { sha512: None, ..file };
        assert!(bare.checksum().is_none());
    }

    #[test]
    fn release_tag_counts_in_first_seen_order() {
        let cat = sample();
        let counts: Vec<_> = cat
            .release_tag_counts("precise", "server")
            .into_iter()
            .map(|(t, n)| (t.to_string(), n))
            .collect();
        assert_eq!(
            counts,
            vec![("daily".to_string(), 2), ("beta-2".to_string(), 1)]
        );
    }

    #[test]
    fn registrations_flatten_and_filter() {
        let cat = sample();
        let rows = cat.registrations("precise", "server", &RegistrationFilter::default());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].published_id.as_deref(), Some("ami-1"));
        assert_eq!(
            rows[0].path.as_deref(),
            Some("http://mirror.example/precise/20120102/disk.tar.gz")
        );
        assert_eq!(rows[0].registered_name.as_deref(), Some("ubuntu-precise-daily"));

        let filter = RegistrationFilter {
            cloud: Some("EC2".into()),
            instance_type: Some("EBS".into()),
            region: Some("eu-west-1".into()),
            latest_only: true,
            ..RegistrationFilter::default()
        };
        let rows = cat.registrations("precise", "server", &filter);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].published_id.as_deref(), Some("ami-2"));

        let filter = RegistrationFilter {
            arch: Some("i386".into()),
            ..RegistrationFilter::default()
        };
        assert!(cat.registrations("precise", "server", &filter).is_empty());
    }

    #[test]
    fn file_listing_defaults_to_newest_packed_files() {
        let cat = sample();
        let listed = cat.file_listing("precise", "server", &FileQuery::default());
        let paths: Vec<_> = listed.iter().map(|f| f.file.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["precise/20120102/disk.tar.gz", "precise/20120102/disk.manifest"]
        );

        let query = FileQuery {
            included: vec!["manifest".into()],
            ..FileQuery::default()
        };
        let listed = cat.file_listing("precise", "server", &query);
        assert_eq!(listed.len(), 1);
        assert_eq!(
            listed[0].url.as_deref(),
            Some("http://mirror.example/precise/20120102/disk.manifest")
        );

        let query = FileQuery {
            excluded: vec!["manifest".into()],
            include_unpacked: true,
            ..FileQuery::default()
        };
        let types: Vec<_> = cat
            .file_listing("precise", "server", &query)
            .iter()
            .map(|f| f.file.file_type.as_str())
            .collect();
        assert_eq!(types, vec!["tar.gz", "kernel"]);

        let query = FileQuery {
            serial: Some("20120101".into()),
            ..FileQuery::default()
        };
        assert!(cat.file_listing("precise", "server", &query).is_empty());
    }
}
