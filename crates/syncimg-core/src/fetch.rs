//! Cache-aware, checksum-verified file retrieval.
//!
//! A fetch copies a cached file when one with the expected checksum exists
//! and otherwise streams the remote file to disk while hashing it block by
//! block. Nothing is recorded in the cache unless the content verified.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use syncimg_schema::{BLOCK_SIZE, Checksum};
use thiserror::Error;

use crate::cache::{ContentCache, Partition};
use crate::reporter::Reporter;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },
}

/// Opens a byte stream for a URL.
pub trait Transport {
    fn open(&self, url: &str) -> Result<Box<dyn Read + '_>, FetchError>;
}

/// HTTP(S) transport over a blocking `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(format!("syncimg/{}", env!("CARGO_PKG_VERSION")))
            .timeout(None::<std::time::Duration>)
            .build()?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &reqwest::blocking::Client {
        &self.client
    }
}

impl Transport for HttpTransport {
    fn open(&self, url: &str) -> Result<Box<dyn Read + '_>, FetchError> {
        let response = self.client.get(url).send()?.error_for_status()?;
        Ok(Box::new(response))
    }
}

/// Reads `file://` URLs and bare paths from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTransport;

impl Transport for LocalTransport {
    fn open(&self, url: &str) -> Result<Box<dyn Read + '_>, FetchError> {
        let path = url.strip_prefix("file://").unwrap_or(url);
        Ok(Box::new(File::open(path)?))
    }
}

/// Dispatches on the URL scheme: `http`/`https` go to [`HttpTransport`],
/// `file://` and scheme-less paths to [`LocalTransport`].
#[derive(Debug, Clone)]
pub struct DefaultTransport {
    http: HttpTransport,
    local: LocalTransport,
}

impl DefaultTransport {
    pub fn new() -> Result<Self, FetchError> {
        Ok(Self {
            http: HttpTransport::new()?,
            local: LocalTransport,
        })
    }

    /// The HTTP side, shared with catalog reads.
    pub fn http(&self) -> &HttpTransport {
        &self.http
    }
}

impl Transport for DefaultTransport {
    fn open(&self, url: &str) -> Result<Box<dyn Read + '_>, FetchError> {
        match url.split_once("://").map(|(scheme, _)| scheme) {
            Some("http" | "https") => self.http.open(url),
            Some("file") | None => self.local.open(url),
            Some(other) => Err(FetchError::UnsupportedScheme(other.to_string())),
        }
    }
}

/// One file to retrieve.
#[derive(Debug, Clone)]
pub struct FetchRequest<'a> {
    pub url: &'a str,
    pub expected: &'a Checksum,
    pub destination: &'a Path,
    pub pristine: Option<&'a Path>,
}

impl<'a> FetchRequest<'a> {
    pub fn new(url: &'a str, expected: &'a Checksum, destination: &'a Path) -> Self {
        Self {
            url,
            expected,
            destination,
            pristine: None,
        }
    }

    /// Also keep an unmodified copy at `pristine`. The download lands there
    /// first and is copied to the destination.
    pub fn with_pristine(mut self, pristine: Option<&'a Path>) -> Self {
        self.pristine = pristine;
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    /// Do no I/O; report the expected checksum.
    pub simulate: bool,
    /// Skip the cache lookup (the result is still recorded).
    pub ignore_cache: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub local_path: PathBuf,
    pub checksum: Checksum,
    pub from_cache: bool,
    pub simulated: bool,
}

/// Produce a verified local copy of `request.url` at `request.destination`.
///
/// On success the cache gains an entry for the downloaded file and is saved;
/// a failed save is only a warning. On checksum mismatch the partial file is
/// removed and the cache is left untouched.
pub fn fetch(
    transport: &dyn Transport,
    cache: &mut ContentCache,
    request: &FetchRequest<'_>,
    options: FetchOptions,
    reporter: &dyn Reporter,
    depth: usize,
) -> Result<FetchResult, FetchError> {
    let expected = request.expected;

    if options.simulate {
        reporter.info(depth, &format!("Simulated fetch of {}", request.url));
        return Ok(FetchResult {
            local_path: request.destination.to_path_buf(),
            checksum: expected.clone(),
            from_cache: false,
            simulated: true,
        });
    }

    if !options.ignore_cache {
        if let Some(cached) = cache.lookup(expected) {
            if copy_from_cache(&cached, request)? {
                reporter.info(depth, &format!("Using cached copy {}", cached.display()));
                return Ok(FetchResult {
                    local_path: request.destination.to_path_buf(),
                    checksum: expected.clone(),
                    from_cache: true,
                    simulated: false,
                });
            }
            reporter.warning(
                depth,
                &format!("Cached copy {} failed verification", cached.display()),
            );
            cache.purge(expected);
        }
    }

    let target = request.pristine.unwrap_or(request.destination);
    reporter.info(depth, &format!("Downloading {}", request.url));
    let actual = download(transport, request.url, target, expected)?;

    if !expected.matches(&actual) {
        fs::remove_file(target).ok();
        return Err(FetchError::ChecksumMismatch {
            url: request.url.to_string(),
            expected: expected.to_string(),
            actual,
        });
    }

    if target != request.destination {
        ensure_parent(request.destination)?;
        fs::copy(target, request.destination)?;
    }

    let partition = if request.pristine.is_some() {
        Partition::Pristine
    } else {
        Partition::Processed
    };
    cache.record(expected.clone(), target.to_path_buf(), partition);
    if let Err(e) = cache.save() {
        reporter.warning(depth, &format!("Failed to save download cache: {e}"));
    }

    Ok(FetchResult {
        local_path: request.destination.to_path_buf(),
        checksum: expected.clone(),
        from_cache: false,
        simulated: false,
    })
}

/// Stream `url` into `dest`, returning the hex digest of what was written.
fn download(
    transport: &dyn Transport,
    url: &str,
    dest: &Path,
    expected: &Checksum,
) -> Result<String, FetchError> {
    ensure_parent(dest)?;
    let mut reader = transport.open(url)?;
    let mut file = File::create(dest)?;
    let mut hasher = expected.hasher();
    let mut buffer = vec![0u8; BLOCK_SIZE];

    loop {
        let count = reader.read(&mut buffer)?;
        if count == 0 {
            break;
        }
        file.write_all(&buffer[..count])?;
        hasher.update(&buffer[..count]);
    }
    file.flush()?;

    Ok(hasher.finalize_hex())
}

/// Copy a cache hit into place and re-verify the copy. Returns `false` when
/// the copied bytes do not match.
fn copy_from_cache(cached: &Path, request: &FetchRequest<'_>) -> io::Result<bool> {
    let mut targets = vec![request.destination];
    if let Some(pristine) = request.pristine {
        if pristine != request.destination {
            targets.push(pristine);
        }
    }

    for target in targets {
        if target == cached {
            continue;
        }
        ensure_parent(target)?;
        fs::copy(cached, target)?;
        if !request.expected.verify_file(target)? {
            fs::remove_file(target).ok();
            return Ok(false);
        }
    }
    Ok(true)
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::NullReporter;
    use std::cell::Cell;

    const HELLO_SHA1: &str = "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed";

    struct CountingTransport {
        body: Vec<u8>,
        opened: Cell<usize>,
    }

    impl CountingTransport {
        fn new(body: &[u8]) -> Self {
            Self {
                body: body.to_vec(),
                opened: Cell::new(0),
            }
        }
    }

    impl Transport for CountingTransport {
        fn open(&self, _url: &str) -> Result<Box<dyn Read + '_>, FetchError> {
            self.opened.set(self.opened.get() + 1);
            Ok(Box::new(&self.body[..]))
        }
    }

    #[test]
    fn second_fetch_comes_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let transport = CountingTransport::new(b"hello world");
        let mut cache = ContentCache::in_memory();
        let sum = Checksum::sha1(HELLO_SHA1).unwrap();

        let first_dest = dir.path().join("a/disk.img");
        let req = FetchRequest::new("http://x/disk.img", &sum, &first_dest);
        let first = fetch(&transport, &mut cache, &req, FetchOptions::default(), &NullReporter, 0).unwrap();
        assert!(!first.from_cache);

        let second_dest = dir.path().join("b/disk.img");
        let req = FetchRequest::new("http://x/disk.img", &sum, &second_dest);
        let second = fetch(&transport, &mut cache, &req, FetchOptions::default(), &NullReporter, 0).unwrap();
        assert!(second.from_cache);
        assert_eq!(transport.opened.get(), 1);
        assert_eq!(fs::read(&second_dest).unwrap(), b"hello world");
    }

    #[test]
    fn mismatch_leaves_cache_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let transport = CountingTransport::new(b"something else");
        let mut cache = ContentCache::in_memory();
        let sum = Checksum::sha1(HELLO_SHA1).unwrap();
        let dest = dir.path().join("disk.img");

        let req = FetchRequest::new("http://x/disk.img", &sum, &dest);
        let err = fetch(&transport, &mut cache, &req, FetchOptions::default(), &NullReporter, 0).unwrap_err();
        assert!(matches!(err, FetchError::ChecksumMismatch { .. }));
        assert!(cache.is_empty());
        assert!(!dest.exists());
    }

    #[test]
    fn pristine_copy_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let transport = CountingTransport::new(b"hello world");
        let mut cache = ContentCache::in_memory();
        let sum = Checksum::sha1(HELLO_SHA1).unwrap();
        let dest = dir.path().join("work/disk.img");
        let pristine = dir.path().join("pristine/disk.img");

        let req = FetchRequest::new("http://x/disk.img", &sum, &dest).with_pristine(Some(&pristine));
        fetch(&transport, &mut cache, &req, FetchOptions::default(), &NullReporter, 0).unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"hello world");
        assert_eq!(fs::read(&pristine).unwrap(), b"hello world");
        assert_eq!(cache.lookup(&sum), Some(pristine));
    }

    #[test]
    fn simulate_does_no_io() {
        let dir = tempfile::tempdir().unwrap();
        let transport = CountingTransport::new(b"");
        let mut cache = ContentCache::in_memory();
        let sum = Checksum::sha1(HELLO_SHA1).unwrap();
        let dest = dir.path().join("disk.img");

        let req = FetchRequest::new("http://x/disk.img", &sum, &dest);
        let options = FetchOptions {
            simulate: true,
            ..FetchOptions::default()
        };
        let result = fetch(&transport, &mut cache, &req, options, &NullReporter, 0).unwrap();
        assert!(result.simulated);
        assert_eq!(result.checksum, sum);
        assert_eq!(transport.opened.get(), 0);
        assert!(!dest.exists());
    }

    #[test]
    fn ignore_cache_downloads_again() {
        let dir = tempfile::tempdir().unwrap();
        let transport = CountingTransport::new(b"hello world");
        let mut cache = ContentCache::in_memory();
        let sum = Checksum::sha1(HELLO_SHA1).unwrap();
        let dest = dir.path().join("disk.img");
        let req = FetchRequest::new("http://x/disk.img", &sum, &dest);

        fetch(&transport, &mut cache, &req, FetchOptions::default(), &NullReporter, 0).unwrap();
        let options = FetchOptions {
            ignore_cache: true,
            ..FetchOptions::default()
        };
        let again = fetch(&transport, &mut cache, &req, options, &NullReporter, 0).unwrap();
        assert!(!again.from_cache);
        assert_eq!(transport.opened.get(), 2);
    }

    #[test]
    fn http_transport_streams_body() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/disk.img")
            .with_status(200)
            .with_body("hello world")
            .create();

        let dir = tempfile::tempdir().unwrap();
        let transport = DefaultTransport::new().unwrap();
        let mut cache = ContentCache::in_memory();
        let sum = Checksum::sha1(HELLO_SHA1).unwrap();
        let dest = dir.path().join("disk.img");
        let url = format!("{}/disk.img", server.url());

        let req = FetchRequest::new(&url, &sum, &dest);
        fetch(&transport, &mut cache, &req, FetchOptions::default(), &NullReporter, 0).unwrap();
        mock.assert();
        assert_eq!(fs::read(&dest).unwrap(), b"hello world");
    }

    #[test]
    fn http_errors_are_reported() {
        let mut server = mockito::Server::new();
        let _mock = server.mock("GET", "/missing").with_status(404).create();

        let transport = HttpTransport::new().unwrap();
        let url = format!("{}/missing", server.url());
        assert!(matches!(transport.open(&url), Err(FetchError::Http(_))));
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let transport = DefaultTransport::new().unwrap();
        assert!(matches!(
            transport.open("ftp://example/x"),
            Err(FetchError::UnsupportedScheme(s)) if s == "ftp"
        ));
    }
}
