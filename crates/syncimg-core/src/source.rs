//! Where the catalog comes from.
//!
//! A catalog is read from an HTTP(S) URL or a local file, decompressed when
//! needed, optionally checked against a detached GPG signature, and parsed.
//! The catalog history file remembers the last manifest serial seen per
//! location so unchanged catalogs can be skipped.

use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE, HeaderName};
use syncimg_schema::{Catalog, CatalogError};
use thiserror::Error;

use crate::fetch::{FetchError, HttpTransport};
use crate::reporter::Reporter;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Unsupported catalog location {0}; use HTTP(S) or a local file")]
    UnsupportedScheme(String),

    #[error("Failed to fetch {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error(transparent)]
    Transport(#[from] FetchError),

    #[error("IO error on {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("Failed to decompress catalog: {0}")]
    Decompress(io::Error),

    #[error("Failed to run gpg: {0}")]
    Verifier(io::Error),

    #[error("Signature verification failed for {location}: {detail}")]
    BadSignature { location: String, detail: String },

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// A catalog location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogSource {
    Url(String),
    File(PathBuf),
}

impl CatalogSource {
    /// `http://` and `https://` are URLs, `file://` and bare paths are files.
    pub fn from_location(location: &str) -> Result<Self, SourceError> {
        match location.split_once("://") {
            Some(("http" | "https", _)) => Ok(Self::Url(location.to_string())),
            Some(("file", path)) => Ok(Self::File(PathBuf::from(path))),
            Some(_) => Err(SourceError::UnsupportedScheme(location.to_string())),
            None => Ok(Self::File(PathBuf::from(location))),
        }
    }

    pub fn location(&self) -> String {
        match self {
            Self::Url(url) => url.clone(),
            Self::File(path) => path.display().to_string(),
        }
    }

    /// Where the detached signature lives: `<url>.gpg` (or `bz2` swapped for
    /// `gpg`), `<file>.gpg` for files.
    pub fn signature(&self) -> Self {
        match self {
            Self::Url(url) if url.contains("bz2") => Self::Url(url.replace("bz2", "gpg")),
            Self::Url(url) => Self::Url(format!("{url}.gpg")),
            Self::File(path) => {
                let mut name = path.clone().into_os_string();
                name.push(".gpg");
                Self::File(PathBuf::from(name))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Plain,
    Gzip,
    Bzip2,
}

impl Encoding {
    fn sniff(bytes: &[u8]) -> Self {
        if bytes.starts_with(&[0x1f, 0x8b]) {
            Self::Gzip
        } else if bytes.starts_with(b"BZh") {
            Self::Bzip2
        } else {
            Self::Plain
        }
    }
}

fn decode(bytes: Vec<u8>, encoding: Encoding) -> Result<Vec<u8>, SourceError> {
    let mut out = Vec::new();
    match encoding {
        Encoding::Plain => return Ok(bytes),
        Encoding::Gzip => flate2::read::GzDecoder::new(bytes.as_slice())
            .read_to_end(&mut out)
            .map_err(SourceError::Decompress)?,
        Encoding::Bzip2 => bzip2::read::BzDecoder::new(bytes.as_slice())
            .read_to_end(&mut out)
            .map_err(SourceError::Decompress)?,
    };
    Ok(out)
}

/// Read `source` and return its decompressed bytes.
///
/// URLs are requested with `Accept-Encoding: gzip` and decoded according to
/// the response headers; local files are decoded by their magic bytes.
pub fn read_source(http: &HttpTransport, source: &CatalogSource) -> Result<Vec<u8>, SourceError> {
    match source {
        CatalogSource::Url(url) => {
            let http_err = |source| SourceError::Http {
                url: url.clone(),
                source,
            };
            let response = http
                .client()
                .get(url)
                .header(ACCEPT_ENCODING, "gzip")
                .send()
                .and_then(reqwest::blocking::Response::error_for_status)
                .map_err(http_err)?;

            let header = |name: HeaderName| {
                response
                    .headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_ascii_lowercase)
            };
            let encoding = if header(CONTENT_ENCODING).as_deref() == Some("gzip") {
                Encoding::Gzip
            } else if header(CONTENT_TYPE).as_deref() == Some("application/x-bzip2") {
                Encoding::Bzip2
            } else {
                Encoding::Plain
            };

            let body = response.bytes().map_err(http_err)?;
            decode(body.to_vec(), encoding)
        }
        CatalogSource::File(path) => {
            let bytes = fs::read(path).map_err(|source| SourceError::Io {
                path: path.clone(),
                source,
            })?;
            let encoding = Encoding::sniff(&bytes);
            decode(bytes, encoding)
        }
    }
}

/// Checks detached signatures with `gpg` against a single keyring.
#[derive(Debug, Clone)]
pub struct GpgVerifier {
    keyring: PathBuf,
    program: PathBuf,
}

impl GpgVerifier {
    pub fn new(keyring: impl Into<PathBuf>) -> Self {
        Self {
            keyring: keyring.into(),
            program: PathBuf::from("gpg"),
        }
    }

    /// Use a different verifier binary; it receives the same arguments.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Verify `data` against `signature`. Both are written to temporary
    /// files that are removed when this returns, whatever the outcome.
    pub fn verify(&self, location: &str, data: &[u8], signature: &[u8]) -> Result<(), SourceError> {
        let data_file = write_temp(data)?;
        let sig_file = write_temp(signature)?;

        let output = Command::new(&self.program)
            .arg("--no-default-keyring")
            .arg("--keyring")
            .arg(&self.keyring)
            .arg("--verify")
            .arg(sig_file.path())
            .arg(data_file.path())
            .output()
            .map_err(SourceError::Verifier)?;

        if output.status.success() {
            Ok(())
        } else {
            Err(SourceError::BadSignature {
                location: location.to_string(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

fn write_temp(bytes: &[u8]) -> Result<tempfile::NamedTempFile, SourceError> {
    let io_err = |source| SourceError::Io {
        path: std::env::temp_dir(),
        source,
    };
    let mut file = tempfile::Builder::new()
        .prefix("syncimg-catalog-")
        .tempfile()
        .map_err(io_err)?;
    file.write_all(bytes).map_err(io_err)?;
    file.flush().map_err(io_err)?;
    Ok(file)
}

/// Read, verify (when a verifier is given) and parse the catalog.
pub fn load_catalog(
    http: &HttpTransport,
    source: &CatalogSource,
    verifier: Option<&GpgVerifier>,
    reporter: &dyn Reporter,
) -> Result<Catalog, SourceError> {
    let location = source.location();
    reporter.info(0, &format!("Fetching catalog {location}"));
    let data = read_source(http, source)?;

    if let Some(verifier) = verifier {
        let sig_source = source.signature();
        reporter.info(0, &format!("Checking signature {}", sig_source.location()));
        let signature = read_source(http, &sig_source)?;
        verifier.verify(&location, &data, &signature)?;
    }

    Ok(Catalog::parse(&data)?)
}

/// Append-only record of `<location> <manifest serial>` lines.
#[derive(Debug, Clone)]
pub struct CatalogHistory {
    path: PathBuf,
}

impl CatalogHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last serial recorded for `location`; later lines win.
    pub fn last_serial(&self, location: &str) -> Result<Option<u64>, SourceError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(SourceError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        Ok(text
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                match (fields.next(), fields.next()) {
                    (Some(loc), Some(serial)) if loc == location => serial.parse().ok(),
                    _ => None,
                }
            })
            .last())
    }

    /// Whether a catalog with `serial` at `location` has not been seen yet.
    /// A catalog without a serial is always new.
    pub fn is_new(&self, location: &str, serial: Option<u64>) -> Result<bool, SourceError> {
        let Some(serial) = serial else {
            return Ok(true);
        };
        Ok(self
            .last_serial(location)?
            .is_none_or(|last| serial > last))
    }

    /// Append `serial` for `location` if it is new.
    pub fn record(&self, location: &str, serial: Option<u64>) -> Result<bool, SourceError> {
        let Some(serial) = serial else {
            return Ok(false);
        };
        if !self.is_new(location, Some(serial))? {
            return Ok(false);
        }

        let io_err = |source| SourceError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        writeln!(file, "{location} {serial}").map_err(io_err)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::NullReporter;

    const CATALOG: &str = r#"{
        "manifest": {"serial": 7},
        "mirrors": {"transfer": ["http://example.com/"]},
        "catalog": [{"distro_code_name": "precise", "build_types": {"server": [
            {"build_serial": "20240101", "release_tag": "daily", "arches": {}}
        ]}}]
    }"#;

    #[test]
    fn locations_and_signatures() {
        let url = CatalogSource::from_location("https://example.com/builds.json").unwrap();
        assert_eq!(
            url.signature(),
            CatalogSource::Url("https://example.com/builds.json.gpg".into())
        );

        let bz = CatalogSource::from_location("http://example.com/ec2.json.bz2").unwrap();
        assert_eq!(
            bz.signature(),
            CatalogSource::Url("http://example.com/ec2.json.gpg".into())
        );

        let file = CatalogSource::from_location("file:///tmp/builds.json").unwrap();
        assert_eq!(file, CatalogSource::File(PathBuf::from("/tmp/builds.json")));
        assert_eq!(
            file.signature(),
            CatalogSource::File(PathBuf::from("/tmp/builds.json.gpg"))
        );

        assert!(matches!(
            CatalogSource::from_location("ftp://example.com/builds.json"),
            Err(SourceError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn reads_compressed_files() {
        let dir = tempfile::tempdir().unwrap();
        let http = HttpTransport::new().unwrap();

        let plain = dir.path().join("plain.json");
        fs::write(&plain, CATALOG).unwrap();

        let gz = dir.path().join("catalog.json.gz");
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(CATALOG.as_bytes()).unwrap();
        fs::write(&gz, enc.finish().unwrap()).unwrap();

        let bz = dir.path().join("catalog.json.bz2");
        let mut enc = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        enc.write_all(CATALOG.as_bytes()).unwrap();
        fs::write(&bz, enc.finish().unwrap()).unwrap();

        for path in [plain, gz, bz] {
            let bytes = read_source(&http, &CatalogSource::File(path)).unwrap();
            assert_eq!(bytes, CATALOG.as_bytes());
        }
    }

    #[test]
    fn fetches_gzip_over_http() {
        let mut server = mockito::Server::new();
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(CATALOG.as_bytes()).unwrap();
        let mock = server
            .mock("GET", "/builds.json")
            .match_header("accept-encoding", "gzip")
            .with_header("content-encoding", "gzip")
            .with_body(enc.finish().unwrap())
            .create();

        let http = HttpTransport::new().unwrap();
        let source = CatalogSource::Url(format!("{}/builds.json", server.url()));
        let catalog = load_catalog(&http, &source, None, &NullReporter).unwrap();
        mock.assert();
        assert_eq!(catalog.manifest_serial(), Some(7));
        assert_eq!(catalog.distros().collect::<Vec<_>>(), vec!["precise"]);
    }

    #[cfg(unix)]
    #[test]
    fn failing_verifier_rejects_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("builds.json");
        fs::write(&data, CATALOG).unwrap();
        fs::write(dir.path().join("builds.json.gpg"), b"sig").unwrap();

        let http = HttpTransport::new().unwrap();
        let source = CatalogSource::File(data);

        let bad = GpgVerifier::new("/nonexistent.gpg").with_program("false");
        assert!(matches!(
            load_catalog(&http, &source, Some(&bad), &NullReporter),
            Err(SourceError::BadSignature { .. })
        ));

        let good = GpgVerifier::new("/nonexistent.gpg").with_program("true");
        assert!(load_catalog(&http, &source, Some(&good), &NullReporter).is_ok());
    }

    #[test]
    fn history_tracks_serials() {
        let dir = tempfile::tempdir().unwrap();
        let history = CatalogHistory::new(dir.path().join("history.log"));
        let loc = "http://example.com/builds.json";

        assert!(history.is_new(loc, Some(5)).unwrap());
        assert!(history.record(loc, Some(5)).unwrap());
        assert!(!history.is_new(loc, Some(5)).unwrap());
        assert!(!history.record(loc, Some(4)).unwrap());
        assert!(history.is_new(loc, Some(6)).unwrap());
        assert!(history.is_new("other", Some(1)).unwrap());
        assert!(history.is_new(loc, None).unwrap());

        assert!(history.record(loc, Some(9)).unwrap());
        assert_eq!(history.last_serial(loc).unwrap(), Some(9));
    }
}
