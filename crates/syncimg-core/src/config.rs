//! YAML configuration.
//!
//! A configuration has global settings (directories, catalog location,
//! signature checking) and a set of suite rules (which files and
//! architectures to handle, retention, the five commands). Suite rules apply
//! to every distro and can be overridden per distro:
//!
//! ```yaml
//! max_dailies: latest
//! overrides:
//!   - precise:
//!       max_dailies: n-3
//! ```
//!
//! Everything that can be checked without a catalog is checked at load time,
//! including every command template against every distro override.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::retention::{KeepRule, RetentionPolicy};
use crate::template::{CommandKind, CommandTemplate, TemplateError};

/// Built-in configuration, printed by `syncimg default-config`.
pub const DEFAULT_CONFIG: &str = r"#cloudimg-sync-config:
sync_dir: /srv/cloudimgs/data
pristine: /srv/cloudimgs/pristine
copy_pristine: true
history_log: /srv/cloudimgs/history.log
reg_log: /srv/cloudimgs/build.log
process_logs: /srv/cloudimgs/logs
download_log: /srv/cloudimgs/download.log
host_url: http://cloud-images.ubuntu.com/query2/server/release/builds.json
gpg_validate: true
gpg_keyring: /usr/share/keyrings/ubuntu-cloudimg-keyring.gpg
enable_overrides: true
suites: available
stream: server
unpacked: false
publish: [ manifest ]
mirror: [ manifest ]
arches: [ i386, amd64 ]
mirror_arches: [ armel, armhf ]
check_types: [ manifest ]
customize_types: [ ]
max_dailies: latest
max_milestones: latest
keep_pre_release: true
list_cmd: |
    echo 'release 20120222 amd64'
check_cmd: |
    /bin/true
custom_cmd: |
    /srv/cloudimgs/bin/custom.sh
publish_cmd: |
    /bin/true
unpublish_cmd: |
    /bin/true
overrides:
";

const DEFAULT_KEYRING: &str = "/usr/share/keyrings/ubuntu-cloudimg-keyring.gpg";
const DEFAULT_STREAM: &str = "server";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("Invalid command for {distro}: {source}")]
    Template {
        distro: String,
        source: TemplateError,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Which distros to process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Suites {
    /// Every distro in the catalog.
    #[default]
    Available,
    Only(Vec<String>),
}

impl Suites {
    pub fn includes(&self, distro: &str) -> bool {
        match self {
            Self::Available => true,
            Self::Only(list) => list.iter().any(|d| d == distro),
        }
    }
}

impl<'de> Deserialize<'de> for Suites {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            List(Vec<String>),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) if s.trim().eq_ignore_ascii_case("available") => Self::Available,
            Raw::Text(s) => Self::Only(s.split_whitespace().map(str::to_string).collect()),
            Raw::List(list) => Self::Only(list),
        })
    }
}

/// Suite rules as written; any field may be absent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SuiteSettings {
    pub stream: Option<String>,
    pub publish: Option<Vec<String>>,
    pub mirror: Option<Vec<String>>,
    pub arches: Option<Vec<String>>,
    pub mirror_arches: Option<Vec<String>>,
    pub check_types: Option<Vec<String>>,
    pub customize_types: Option<Vec<String>>,
    pub unpacked: Option<bool>,
    pub max_dailies: Option<KeepRule>,
    pub max_milestones: Option<KeepRule>,
    pub keep_pre_release: Option<bool>,
    pub list_cmd: Option<String>,
    pub check_cmd: Option<String>,
    pub custom_cmd: Option<String>,
    pub publish_cmd: Option<String>,
    pub unpublish_cmd: Option<String>,
}

macro_rules! overlay_fields {
    ($dst:ident, $src:ident, $($field:ident),+ $(,)?) => {
        $(
            if $src.$field.is_some() {
                $dst.$field.clone_from(&$src.$field);
            }
        )+
    };
}

impl SuiteSettings {
    /// Apply every field `other` sets on top of `self`.
    pub fn overlay(&mut self, other: &SuiteSettings) {
        overlay_fields!(
            self,
            other,
            stream,
            publish,
            mirror,
            arches,
            mirror_arches,
            check_types,
            customize_types,
            unpacked,
            max_dailies,
            max_milestones,
            keep_pre_release,
            list_cmd,
            check_cmd,
            custom_cmd,
            publish_cmd,
            unpublish_cmd,
        );
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub sync_dir: PathBuf,
    #[serde(default)]
    pub pristine: Option<PathBuf>,
    #[serde(default)]
    pub copy_pristine: bool,
    #[serde(default)]
    pub history_log: Option<PathBuf>,
    /// Registration ledger file.
    pub reg_log: PathBuf,
    pub process_logs: PathBuf,
    /// Download cache file.
    pub download_log: PathBuf,
    pub host_url: String,
    #[serde(default)]
    pub gpg_validate: bool,
    #[serde(default = "default_keyring")]
    pub gpg_keyring: PathBuf,
    #[serde(default = "default_true")]
    pub enable_overrides: bool,
    #[serde(default)]
    pub suites: Suites,
    #[serde(default)]
    pub overrides: Option<Vec<BTreeMap<String, SuiteSettings>>>,
    #[serde(flatten)]
    pub defaults: SuiteSettings,
}

fn default_keyring() -> PathBuf {
    PathBuf::from(DEFAULT_KEYRING)
}

fn default_true() -> bool {
    true
}

/// Compiled commands of one suite; unset or blank commands are `None`.
#[derive(Debug, Clone, Default)]
pub struct SuiteCommands {
    pub list: Option<CommandTemplate>,
    pub check: Option<CommandTemplate>,
    pub customize: Option<CommandTemplate>,
    pub publish: Option<CommandTemplate>,
    pub unpublish: Option<CommandTemplate>,
}

/// Fully resolved rules for one distro.
#[derive(Debug, Clone)]
pub struct SuiteConfig {
    pub distro: String,
    pub stream: String,
    pub publish: Vec<String>,
    pub mirror: Vec<String>,
    pub arches: Vec<String>,
    pub mirror_arches: Vec<String>,
    pub check_types: Vec<String>,
    pub customize_types: Vec<String>,
    pub unpacked: bool,
    pub retention: RetentionPolicy,
    pub keep_pre_release: bool,
    pub commands: SuiteCommands,
}

impl SuiteConfig {
    /// Architectures handled at all: processed or mirror-only.
    pub fn handles_arch(&self, arch: &str) -> bool {
        self.arches.iter().any(|a| a == arch) || self.is_mirror_only(arch)
    }

    /// Architectures that are downloaded but never customized or published.
    pub fn is_mirror_only(&self, arch: &str) -> bool {
        self.mirror_arches.iter().any(|a| a == arch)
    }

    /// File types that are fetched (mirror or publish).
    pub fn wants_type(&self, file_type: &str) -> bool {
        self.mirror.iter().chain(&self.publish).any(|t| t == file_type)
    }

    pub fn is_check_type(&self, file_type: &str) -> bool {
        self.check_types.iter().any(|t| t == file_type)
    }

    pub fn is_customize_type(&self, file_type: &str) -> bool {
        self.customize_types.iter().any(|t| t == file_type)
    }

    pub fn is_publish_type(&self, file_type: &str) -> bool {
        self.publish.iter().any(|t| t == file_type)
    }

    /// Check types that are also fetched; these files are handled first.
    pub fn first_types(&self) -> Vec<String> {
        self.check_types
            .iter()
            .filter(|t| self.wants_type(t))
            .cloned()
            .collect()
    }
}

impl Config {
    /// Read and validate the configuration at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml_ng::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// The built-in configuration.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_yaml(DEFAULT_CONFIG)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.copy_pristine && self.pristine.is_none() {
            return Err(ConfigError::Invalid(
                "copy_pristine is set but no pristine directory is configured".to_string(),
            ));
        }
        if self.host_url.trim().is_empty() {
            return Err(ConfigError::Invalid("host_url is empty".to_string()));
        }

        self.resolve("*", &self.defaults)?;
        for name in self.override_names() {
            self.for_distro(name)?;
        }
        Ok(())
    }

    fn override_names(&self) -> impl Iterator<Item = &str> {
        self.overrides
            .iter()
            .flatten()
            .flat_map(BTreeMap::keys)
            .map(String::as_str)
    }

    pub fn suite_included(&self, distro: &str) -> bool {
        self.suites.includes(distro)
    }

    /// Pristine directory, when pristine copies are kept.
    pub fn pristine_dir(&self) -> Option<&Path> {
        if self.copy_pristine {
            self.pristine.as_deref()
        } else {
            None
        }
    }

    /// Rules for `distro`: the defaults with every matching override applied
    /// in file order.
    pub fn for_distro(&self, distro: &str) -> Result<SuiteConfig, ConfigError> {
        let mut settings = self.defaults.clone();
        if self.enable_overrides {
            for entry in self.overrides.iter().flatten() {
                if let Some(over) = entry.get(distro) {
                    settings.overlay(over);
                }
            }
        }
        self.resolve(distro, &settings)
    }

    fn resolve(&self, distro: &str, s: &SuiteSettings) -> Result<SuiteConfig, ConfigError> {
        let compile = |kind: CommandKind, source: &Option<String>| -> Result<Option<CommandTemplate>, ConfigError> {
            match source.as_deref().map(str::trim) {
                None | Some("") => Ok(None),
                Some(text) => CommandTemplate::parse(kind, text)
                    .map(Some)
                    .map_err(|source| ConfigError::Template {
                        distro: distro.to_string(),
                        source,
                    }),
            }
        };

        let commands = SuiteCommands {
            list: compile(CommandKind::List, &s.list_cmd)?,
            check: compile(CommandKind::Check, &s.check_cmd)?,
            customize: compile(CommandKind::Customize, &s.custom_cmd)?,
            publish: compile(CommandKind::Publish, &s.publish_cmd)?,
            unpublish: compile(CommandKind::Unpublish, &s.unpublish_cmd)?,
        };

        let defaults = RetentionPolicy::default();
        Ok(SuiteConfig {
            distro: distro.to_string(),
            stream: s.stream.clone().unwrap_or_else(|| DEFAULT_STREAM.to_string()),
            publish: s.publish.clone().unwrap_or_default(),
            mirror: s.mirror.clone().unwrap_or_default(),
            arches: s.arches.clone().unwrap_or_default(),
            mirror_arches: s.mirror_arches.clone().unwrap_or_default(),
            check_types: s.check_types.clone().unwrap_or_default(),
            customize_types: s.customize_types.clone().unwrap_or_default(),
            unpacked: s.unpacked.unwrap_or(false),
            retention: RetentionPolicy {
                max_dailies: s.max_dailies.unwrap_or(defaults.max_dailies),
                max_milestones: s.max_milestones.unwrap_or(defaults.max_milestones),
            },
            keep_pre_release: s.keep_pre_release.unwrap_or(true),
            commands,
        })
    }
}
