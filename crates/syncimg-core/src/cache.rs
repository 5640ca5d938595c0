//! Content-addressed download cache.
//!
//! Maps a checksum to a local file already holding that content, so a file
//! published under several paths (or re-listed in a later catalog) is only
//! transferred once. Entries are split into two partitions: `pristine`
//! copies that are never modified, and `processed` working copies that a
//! customize command may later rewrite. Lookups prefer pristine copies.
//!
//! Entries are never trusted blindly: every hit re-hashes the file, and an
//! entry whose file vanished or changed is dropped on the spot.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use syncimg_schema::Checksum;

use crate::reporter::Reporter;
use crate::state::{self, PersistError, StateKind};

/// Cache partition an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Pristine,
    Processed,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct CacheDocument {
    pristine: BTreeMap<Checksum, PathBuf>,
    processed: BTreeMap<Checksum, PathBuf>,
}

impl CacheDocument {
    fn partition_mut(&mut self, partition: Partition) -> &mut BTreeMap<Checksum, PathBuf> {
        match partition {
            Partition::Pristine => &mut self.pristine,
            Partition::Processed => &mut self.processed,
        }
    }
}

#[derive(Debug, Default)]
pub struct ContentCache {
    path: Option<PathBuf>,
    doc: CacheDocument,
}

impl ContentCache {
    /// A cache that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the cache persisted at `path`.
    ///
    /// A missing file gives an empty cache. An unreadable or corrupt file
    /// also gives an empty cache, with a warning; it is overwritten on the
    /// next save.
    pub fn load(path: impl Into<PathBuf>, reporter: &dyn Reporter) -> Self {
        let path = path.into();
        let doc = match state::load::<CacheDocument>(&path, StateKind::Cache) {
            Ok(doc) => doc.unwrap_or_default(),
            Err(e) => {
                reporter.warning(
                    0,
                    &format!(
                        "Download cache {} is unreadable, starting empty: {e}",
                        path.display()
                    ),
                );
                CacheDocument::default()
            }
        };
        Self {
            path: Some(path),
            doc,
        }
    }

    /// Where the cache is persisted, if anywhere.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Path of a verified local copy of `checksum`.
    ///
    /// Stale entries (file missing, unreadable, or content changed) are
    /// removed as a side effect.
    pub fn lookup(&mut self, checksum: &Checksum) -> Option<PathBuf> {
        for partition in [Partition::Pristine, Partition::Processed] {
            let entries = self.doc.partition_mut(partition);
            let Some(candidate) = entries.get(checksum) else {
                continue;
            };
            let valid = candidate.is_file() && checksum.verify_file(candidate).unwrap_or(false);
            if valid {
                return Some(candidate.clone());
            }
            entries.remove(checksum);
        }
        None
    }

    /// Insert or overwrite the entry for `checksum` in `partition`.
    pub fn record(&mut self, checksum: Checksum, path: PathBuf, partition: Partition) {
        self.doc.partition_mut(partition).insert(checksum, path);
    }

    /// Remove `checksum` from both partitions. Returns whether anything was
    /// removed.
    pub fn purge(&mut self, checksum: &Checksum) -> bool {
        let a = self.doc.pristine.remove(checksum).is_some();
        let b = self.doc.processed.remove(checksum).is_some();
        a || b
    }

    pub fn len(&self) -> usize {
        self.doc.pristine.len() + self.doc.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the whole cache back to disk. No-op for in-memory caches.
    pub fn save(&self) -> Result<(), PersistError> {
        match &self.path {
            Some(path) => state::save(path, StateKind::Cache, &self.doc),
            None => Ok(()),
        }
    }
}
