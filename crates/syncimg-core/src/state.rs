//! Versioned envelope for the persisted cache and ledger.
//!
//! Both files are postcard documents prefixed with a small header:
//!
//! ```text
//! [magic "SYNC"] [kind] [format_version] [body]
//! ```
//!
//! The header is decoded first so a file of the wrong kind, an older
//! format, or plain garbage is rejected before the body is touched. Callers
//! treat every decode failure as "corrupt" and fall back to an empty
//! document.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Magic bytes at the start of every state file.
pub const MAGIC: [u8; 4] = *b"SYNC";

/// Current body format. Bump when a body type changes shape.
pub const FORMAT_VERSION: u16 = 1;

/// Which document a state file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateKind {
    Cache,
    Ledger,
}

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Encoding error: {0}")]
    Encode(#[from] postcard::Error),

    #[error("Not a syncimg state file")]
    BadMagic,

    #[error("Expected {expected:?} state, found {found:?}")]
    WrongKind { expected: StateKind, found: StateKind },

    #[error("Unsupported state format version {found} (expected {expected})")]
    Version { found: u16, expected: u16 },

    #[error("Trailing bytes after state document")]
    TrailingBytes,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    magic: [u8; 4],
    kind: StateKind,
    format_version: u16,
}

/// Encode `body` with a header for `kind`.
pub fn encode<T: Serialize>(kind: StateKind, body: &T) -> Result<Vec<u8>, PersistError> {
    let header = Header {
        magic: MAGIC,
        kind,
        format_version: FORMAT_VERSION,
    };
    let mut buf = postcard::to_allocvec(&header)?;
    buf.extend(postcard::to_allocvec(body)?);
    Ok(buf)
}

/// Decode a document written by [`encode`], checking header and length.
pub fn decode<T: DeserializeOwned>(kind: StateKind, bytes: &[u8]) -> Result<T, PersistError> {
    let (header, rest): (Header, &[u8]) = postcard::take_from_bytes(bytes)?;
    if header.magic != MAGIC {
        return Err(PersistError::BadMagic);
    }
    if header.kind != kind {
        return Err(PersistError::WrongKind {
            expected: kind,
            found: header.kind,
        });
    }
    if header.format_version != FORMAT_VERSION {
        return Err(PersistError::Version {
            found: header.format_version,
            expected: FORMAT_VERSION,
        });
    }

    let (body, rest): (T, &[u8]) = postcard::take_from_bytes(rest)?;
    if !rest.is_empty() {
        return Err(PersistError::TrailingBytes);
    }
    Ok(body)
}

/// Read and decode `path`. A missing file is `Ok(None)`.
pub fn load<T: DeserializeOwned>(path: &Path, kind: StateKind) -> Result<Option<T>, PersistError> {
    match fs::read(path) {
        Ok(bytes) => decode(kind, &bytes).map(Some),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Encode `body` and atomically replace `path` with it.
pub fn save<T: Serialize>(path: &Path, kind: StateKind, body: &T) -> Result<(), PersistError> {
    let bytes = encode(kind, body)?;
    write_atomic(path, &bytes)?;
    Ok(())
}

/// Replace `path` with `bytes`: temp file in the same directory, fsync,
/// rename. Readers see either the old or the new content, never a mix.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
