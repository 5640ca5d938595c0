//! Checksums published in the build catalog and streaming verification.
//!
//! The catalog carries SHA1 and SHA512 digests per file. Hashing always runs
//! over fixed-size blocks so memory use stays bounded by [`BLOCK_SIZE`]
//! regardless of image size.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha512};

/// Block size used when hashing files and network streams (1 MiB).
pub const BLOCK_SIZE: usize = 1 << 20;

/// Digest algorithm of a [`Checksum`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum HashType {
    /// SHA1 (40 hex characters). The catalog's primary file digest.
    #[default]
    Sha1,
    /// SHA512 (128 hex characters).
    Sha512,
}

impl HashType {
    /// Get the string representation of the hash type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha512 => "sha512",
        }
    }

    /// Number of hex characters in a digest of this type.
    pub fn hex_len(&self) -> usize {
        match self {
            Self::Sha1 => 40,
            Self::Sha512 => 128,
        }
    }
}

impl std::fmt::Display for HashType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors produced when validating a checksum string.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ChecksumError {
    /// The value is not a hex string of the length the algorithm requires.
    #[error("Invalid {kind} checksum: expected {expected} hex chars, got '{value}'")]
    Invalid {
        /// Algorithm the value was validated against.
        kind: HashType,
        /// Required number of hex characters.
        expected: usize,
        /// The rejected value.
        value: String,
    },
}

/// A validated, lowercase hex digest together with its algorithm.
///
/// Ordering and equality consider both the algorithm and the digest, so a
/// SHA1 and a SHA512 can never collide as cache keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Checksum {
    kind: HashType,
    hex: String,
}

impl Checksum {
    /// Create a validated `Checksum`.
    ///
    /// # Errors
    ///
    /// Returns [`ChecksumError::Invalid`] if `value` is not exactly
    /// [`HashType::hex_len`] ASCII hex characters.
    pub fn new(kind: HashType, value: &str) -> Result<Self, ChecksumError> {
        let value = value.trim();
        if value.len() == kind.hex_len() && value.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Self {
                kind,
                hex: value.to_ascii_lowercase(),
            })
        } else {
            Err(ChecksumError::Invalid {
                kind,
                expected: kind.hex_len(),
                value: value.to_string(),
            })
        }
    }

    /// Shorthand for a validated SHA1 checksum.
    ///
    /// # Errors
    ///
    /// See [`Checksum::new`].
    pub fn sha1(value: &str) -> Result<Self, ChecksumError> {
        Self::new(HashType::Sha1, value)
    }

    /// Shorthand for a validated SHA512 checksum.
    ///
    /// # Errors
    ///
    /// See [`Checksum::new`].
    pub fn sha512(value: &str) -> Result<Self, ChecksumError> {
        Self::new(HashType::Sha512, value)
    }

    /// Digest algorithm.
    pub fn kind(&self) -> HashType {
        self.kind
    }

    /// Return the lowercase hex digest.
    pub fn as_str(&self) -> &str {
        &self.hex
    }

    /// Fresh incremental hasher for this checksum's algorithm.
    pub fn hasher(&self) -> ChecksumHasher {
        ChecksumHasher::new(self.kind)
    }

    /// Whether `hex` (any case) equals this digest.
    pub fn matches(&self, hex: &str) -> bool {
        self.hex.eq_ignore_ascii_case(hex)
    }

    /// Re-hash the file at `path` and compare against this digest.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened or read.
    pub fn verify_file(&self, path: &Path) -> io::Result<bool> {
        let actual = compute_file(self.kind, path)?;
        Ok(self.matches(&actual))
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hex)
    }
}

impl AsRef<str> for Checksum {
    fn as_ref(&self) -> &str {
        &self.hex
    }
}

/// Incremental hasher over either supported algorithm.
///
/// Implements [`io::Write`] so it can sit next to a file writer when
/// streaming a download.
#[derive(Debug, Clone)]
pub enum ChecksumHasher {
    /// SHA1 state.
    Sha1(Sha1),
    /// SHA512 state.
    Sha512(Sha512),
}

impl ChecksumHasher {
    /// Create an empty hasher for `kind`.
    pub fn new(kind: HashType) -> Self {
        match kind {
            HashType::Sha1 => Self::Sha1(Sha1::new()),
            HashType::Sha512 => Self::Sha512(Sha512::new()),
        }
    }

    /// Feed more bytes.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha1(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    /// Consume the hasher and return the lowercase hex digest.
    pub fn finalize_hex(self) -> String {
        match self {
            Self::Sha1(h) => hex::encode(h.finalize()),
            Self::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

impl io::Write for ChecksumHasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Hash everything `reader` yields, [`BLOCK_SIZE`] bytes at a time.
///
/// # Errors
///
/// Returns any I/O error raised by `reader`.
pub fn compute_reader<R: Read>(kind: HashType, mut reader: R) -> io::Result<String> {
    let mut hasher = ChecksumHasher::new(kind);
    let mut buffer = vec![0u8; BLOCK_SIZE];
    loop {
        let count = reader.read(&mut buffer)?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }
    Ok(hasher.finalize_hex())
}

/// Hash the file at `path` without loading it into memory.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be opened or read.
pub fn compute_file(kind: HashType, path: &Path) -> io::Result<String> {
    let file = File::open(path)?;
    compute_reader(kind, file)
}
