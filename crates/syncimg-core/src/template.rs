//! `%(name)s` command templates.
//!
//! Templates are compiled when the configuration is loaded. Each command kind
//! accepts a fixed set of placeholders, so a typo or a placeholder that makes
//! no sense for that command (a file checksum in `list_cmd`) fails the load
//! instead of a run halfway through.

use std::fmt;
use std::path::Path;

use chrono::NaiveDate;
use regex::Regex;
use syncimg_schema::FileDescriptor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("{kind}: unknown placeholder %({name})s")]
    Unknown { kind: CommandKind, name: String },

    #[error("{kind}: placeholder %({name})s is not available for this command")]
    NotAllowed { kind: CommandKind, name: String },

    #[error("Invalid template pattern: {0}")]
    Regex(#[from] regex::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Placeholder {
    Distro,
    Suite,
    Version,
    Date,
    Stream,
    Arch,
    BuildSerial,
    BuildSerialId,
    BuildId,
    Tag,
    ReleaseTag,
    FileDescription,
    FileType,
    Sha1,
    Sha512,
    FilePath,
    Local,
    PristineFile,
}

impl Placeholder {
    pub const ALL: [Placeholder; 18] = [
        Self::Distro,
        Self::Suite,
        Self::Version,
        Self::Date,
        Self::Stream,
        Self::Arch,
        Self::BuildSerial,
        Self::BuildSerialId,
        Self::BuildId,
        Self::Tag,
        Self::ReleaseTag,
        Self::FileDescription,
        Self::FileType,
        Self::Sha1,
        Self::Sha512,
        Self::FilePath,
        Self::Local,
        Self::PristineFile,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Distro => "distro",
            Self::Suite => "suite",
            Self::Version => "version",
            Self::Date => "date",
            Self::Stream => "stream",
            Self::Arch => "arch",
            Self::BuildSerial => "build_serial",
            Self::BuildSerialId => "build_serial_id",
            Self::BuildId => "build_id",
            Self::Tag => "tag",
            Self::ReleaseTag => "release_tag",
            Self::FileDescription => "file_description",
            Self::FileType => "file_type",
            Self::Sha1 => "sha1",
            Self::Sha512 => "sha512",
            Self::FilePath => "file_path",
            Self::Local => "local",
            Self::PristineFile => "pristine_file",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }
}

/// The configured commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    List,
    Check,
    Customize,
    Publish,
    Unpublish,
}

const LIST_FIELDS: &[Placeholder] = &[
    Placeholder::Distro,
    Placeholder::Version,
    Placeholder::Date,
    Placeholder::Stream,
];

const UNPUBLISH_FIELDS: &[Placeholder] = &[
    Placeholder::Distro,
    Placeholder::Version,
    Placeholder::Date,
    Placeholder::Stream,
    Placeholder::BuildSerial,
    Placeholder::Tag,
    Placeholder::ReleaseTag,
];

impl CommandKind {
    /// Configuration key the command is read from.
    pub fn config_key(self) -> &'static str {
        match self {
            Self::List => "list_cmd",
            Self::Check => "check_cmd",
            Self::Customize => "custom_cmd",
            Self::Publish => "publish_cmd",
            Self::Unpublish => "unpublish_cmd",
        }
    }

    pub fn allowed(self) -> &'static [Placeholder] {
        match self {
            Self::List => LIST_FIELDS,
            Self::Unpublish => UNPUBLISH_FIELDS,
            Self::Check | Self::Customize | Self::Publish => &Placeholder::ALL,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Placeholder),
}

/// A compiled command template.
#[derive(Debug, Clone)]
pub struct CommandTemplate {
    kind: CommandKind,
    source: String,
    segments: Vec<Segment>,
}

impl CommandTemplate {
    /// Compile `source`, checking every placeholder against `kind`.
    ///
    /// `%%` is a literal `%`; any other `%` not starting a placeholder is
    /// kept as is (so `date +%Y` works unescaped).
    pub fn parse(kind: CommandKind, source: &str) -> Result<Self, TemplateError> {
        let re = Regex::new(r"%%|%\(([^)]*)\)s")?;
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut last = 0;

        for caps in re.captures_iter(source) {
            let Some(whole) = caps.get(0) else { continue };
            literal.push_str(&source[last..whole.start()]);
            last = whole.end();

            let Some(name) = caps.get(1) else {
                literal.push('%');
                continue;
            };
            let name = name.as_str();
            let placeholder = Placeholder::from_name(name).ok_or_else(|| TemplateError::Unknown {
                kind,
                name: name.to_string(),
            })?;
            if !kind.allowed().contains(&placeholder) {
                return Err(TemplateError::NotAllowed {
                    kind,
                    name: name.to_string(),
                });
            }
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Field(placeholder));
        }
        literal.push_str(&source[last..]);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            kind,
            source: source.to_string(),
            segments,
        })
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn placeholders(&self) -> impl Iterator<Item = Placeholder> + '_ {
        self.segments.iter().filter_map(|s| match s {
            Segment::Field(p) => Some(*p),
            Segment::Literal(_) => None,
        })
    }

    /// Substitute every placeholder. Values the context does not carry
    /// render as empty strings.
    pub fn render(&self, ctx: &SubstitutionContext) -> String {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(p) => out.push_str(ctx.value(*p).unwrap_or_default()),
            }
        }
        out
    }
}

/// Values available to a command, filled in as the engine descends from
/// distro to build to architecture to file.
#[derive(Debug, Clone, Default)]
pub struct SubstitutionContext {
    distro: String,
    version: String,
    date: String,
    stream: String,
    build_serial: Option<String>,
    tag: Option<String>,
    arch: Option<String>,
    build_id: Option<String>,
    file_description: Option<String>,
    file_type: Option<String>,
    sha1: Option<String>,
    sha512: Option<String>,
    file_path: Option<String>,
    local: Option<String>,
    pristine_file: Option<String>,
}

impl SubstitutionContext {
    pub fn new(distro: &str, stream: &str, date: NaiveDate) -> Self {
        Self {
            distro: distro.to_string(),
            version: code_name_to_version(distro),
            date: date.format("%Y-%m-%d").to_string(),
            stream: stream.to_string(),
            ..Self::default()
        }
    }

    pub fn with_build(mut self, build_serial: &str, tag: &str) -> Self {
        self.build_serial = Some(build_serial.to_string());
        self.tag = Some(tag.to_string());
        self
    }

    pub fn with_arch(mut self, arch: &str, build_id: Option<&str>) -> Self {
        self.arch = Some(arch.to_string());
        self.build_id = build_id.map(str::to_string);
        self
    }

    pub fn with_file(mut self, file: &FileDescriptor, local: &Path, pristine: Option<&Path>) -> Self {
        self.file_description.clone_from(&file.description);
        self.file_type = Some(file.file_type.clone());
        self.sha1.clone_from(&file.sha1);
        self.sha512.clone_from(&file.sha512);
        self.file_path = Some(file.path.clone());
        self.local = Some(local.display().to_string());
        self.pristine_file = pristine.map(|p| p.display().to_string());
        self
    }

    /// Replace the local file, e.g. after a customize command emitted a new
    /// one.
    pub fn set_local(&mut self, local: &Path) {
        self.local = Some(local.display().to_string());
    }

    pub fn value(&self, placeholder: Placeholder) -> Option<&str> {
        match placeholder {
            Placeholder::Distro | Placeholder::Suite => Some(self.distro.as_str()),
            Placeholder::Version => Some(self.version.as_str()),
            Placeholder::Date => Some(self.date.as_str()),
            Placeholder::Stream => Some(self.stream.as_str()),
            Placeholder::Arch => self.arch.as_deref(),
            Placeholder::BuildSerial | Placeholder::BuildSerialId => self.build_serial.as_deref(),
            Placeholder::BuildId => self.build_id.as_deref(),
            Placeholder::Tag | Placeholder::ReleaseTag => self.tag.as_deref(),
            Placeholder::FileDescription => self.file_description.as_deref(),
            Placeholder::FileType => self.file_type.as_deref(),
            Placeholder::Sha1 => self.sha1.as_deref(),
            Placeholder::Sha512 => self.sha512.as_deref(),
            Placeholder::FilePath => self.file_path.as_deref(),
            Placeholder::Local => self.local.as_deref(),
            Placeholder::PristineFile => self.pristine_file.as_deref(),
        }
    }
}

/// Ubuntu version for a code name, from its first letter: `hardy` is
/// `8.04`, `intrepid` `8.10`, ..., `precise` `12.04`. Unknown names give an
/// empty string.
pub fn code_name_to_version(code_name: &str) -> String {
    match code_name.chars().next() {
        Some(c @ 'h'..='y') => {
            let offset = c as u32 - 'h' as u32;
            let year = 8 + offset / 2;
            let month = if offset % 2 == 0 { "04" } else { "10" };
            format!("{year}.{month}")
        }
        _ => String::new(),
    }
}
