//! Run-level error taxonomy.

use syncimg_schema::CatalogError;
use thiserror::Error;

use crate::command::CommandError;
use crate::config::ConfigError;
use crate::fetch::FetchError;
use crate::state::PersistError;

/// Errors surfaced by the lifecycle engine.
///
/// Only `MalformedCatalog` and failures to write the ledger end a run; the
/// engine catches everything else at the nearest file, architecture, build
/// or distro loop and counts it.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Malformed catalog: {0}")]
    MalformedCatalog(#[from] CatalogError),

    /// Network or filesystem failure, or `FetchError::ChecksumMismatch`.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    CommandFailure(#[from] CommandError),

    #[error("Persisted state unusable: {0}")]
    PersistenceCorrupt(#[from] PersistError),

    #[error("Publish command reported {reported}, expected {expected}")]
    RegistrationMismatch { expected: String, reported: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A catalog file path that would resolve outside the local roots.
    #[error("Catalog path {0:?} escapes the mirror directory")]
    UnsafePath(String),
}
