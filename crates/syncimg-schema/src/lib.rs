//! Shared types for syncimg: the build catalog model, checksums and release
//! tags.
//!
//! Nothing in this crate performs network I/O or runs commands; the engine
//! in `syncimg-core` drives these types.

pub mod catalog;
pub mod hash;
pub mod tag;

// Re-exports
pub use catalog::{
    ArchBuild, Build, Catalog, CatalogError, CloudRegistration, FileDescriptor, FileQuery,
    InstanceType, ListedFile, RegionRegistration, RegistrationFilter, RegistrationRow, latest,
    newest_n,
};
pub use hash::{BLOCK_SIZE, Checksum, ChecksumError, ChecksumHasher, HashType};
pub use tag::ReleaseTag;

/// Release tag value that matches every tag in catalog queries.
pub const ALL_TAGS: &str = "all";
