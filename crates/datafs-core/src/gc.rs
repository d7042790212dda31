//! Garbage collection and integrity checking.
//!
//! Chunks are never freed eagerly when a file shrinks, is overwritten or is
//! deleted. `collect_garbage` is an explicit mark-and-sweep over the whole
//! store; `check` is its read-only counterpart that reports damage.

use std::collections::HashSet;

use datafs_config::{log_store_info, log_store_warn};
use tracing::instrument;

use crate::error::Result;
use crate::hash::ContentHash;
use crate::path;
use crate::store::DataStore;

/// Outcome of a garbage collection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    pub total_chunks: u64,
    /// Chunks referenced by at least one entry
    pub referenced: u64,
    pub orphaned: u64,
    pub orphaned_bytes: u64,
    /// Chunks actually removed; 0 on a dry run
    pub deleted: u64,
}

/// A problem found by [`DataStore::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsckIssue {
    /// An entry references a chunk that is not stored
    MissingChunk { path: String, hash: ContentHash },
    /// Stored chunk lengths do not add up to the entry size
    SizeMismatch {
        path: String,
        size: u64,
        chunk_bytes: u64,
    },
    /// Parent is missing or is a file
    OrphanEntry { path: String, parent: String },
    /// A directory carries content
    DirectoryWithContent { path: String },
}

impl std::fmt::Display for FsckIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FsckIssue::MissingChunk { path, hash } => {
                write!(f, "{path}: missing chunk {}", hash.short())
            }
            FsckIssue::SizeMismatch {
                path,
                size,
                chunk_bytes,
            } => write!(f, "{path}: size {size} but chunks hold {chunk_bytes} bytes"),
            FsckIssue::OrphanEntry { path, parent } => {
                write!(f, "{path}: parent {parent} is missing or not a directory")
            }
            FsckIssue::DirectoryWithContent { path } => {
                write!(f, "{path}: directory has content")
            }
        }
    }
}

/// Outcome of an integrity check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FsckReport {
    pub entries_checked: u64,
    pub chunks_checked: u64,
    pub issues: Vec<FsckIssue>,
}

impl FsckReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

impl DataStore {
    /// Delete every chunk no entry references.
    ///
    /// Mark and sweep share one write transaction, so a concurrent write
    /// cannot slip a new reference in between.
    #[instrument(skip(self), level = "debug")]
    pub fn collect_garbage(&self, dry_run: bool) -> Result<GcReport> {
        let mut wtxn = self.write_txn()?;

        let mut live: HashSet<ContentHash> = HashSet::new();
        for (_, entry) in self.metadata.all(&wtxn)? {
            live.extend(entry.chunk_refs.iter().copied());
        }

        let mut report = GcReport::default();
        let mut orphans = Vec::new();
        for (hash, len) in self.content.list(&wtxn)? {
            report.total_chunks += 1;
            if live.contains(&hash) {
                report.referenced += 1;
            } else {
                report.orphaned += 1;
                report.orphaned_bytes += len;
                orphans.push(hash);
            }
        }

        if dry_run {
            return Ok(report);
        }

        for hash in &orphans {
            if self.content.delete_chunk(&mut wtxn, hash)? {
                report.deleted += 1;
            }
        }
        wtxn.commit()?;

        log_store_info!(
            "Garbage collection finished",
            deleted = report.deleted,
            freed_bytes = report.orphaned_bytes,
            kept = report.referenced
        );
        Ok(report)
    }

    /// Scan every entry against the content store without modifying it.
    pub fn check(&self) -> Result<FsckReport> {
        let rtxn = self.read_txn()?;
        let mut report = FsckReport::default();

        let entries = self.metadata.all(&rtxn)?;
        for (key, entry) in &entries {
            report.entries_checked += 1;

            if let Some(parent) = path::parent(key) {
                let parent_ok = self
                    .metadata
                    .try_get(&rtxn, parent)?
                    .is_some_and(|p| p.is_dir());
                if !parent_ok {
                    report.issues.push(FsckIssue::OrphanEntry {
                        path: key.clone(),
                        parent: parent.to_string(),
                    });
                }
            }

            if entry.is_dir() {
                if entry.size != 0 || !entry.chunk_refs.is_empty() {
                    report.issues.push(FsckIssue::DirectoryWithContent { path: key.clone() });
                }
                continue;
            }

            let mut chunk_bytes = 0u64;
            let mut complete = true;
            for hash in &entry.chunk_refs {
                report.chunks_checked += 1;
                match self.content.chunk_len(&rtxn, hash)? {
                    Some(len) => chunk_bytes += len,
                    None => {
                        complete = false;
                        report.issues.push(FsckIssue::MissingChunk {
                            path: key.clone(),
                            hash: *hash,
                        });
                    }
                }
            }
            if complete && chunk_bytes != entry.size {
                report.issues.push(FsckIssue::SizeMismatch {
                    path: key.clone(),
                    size: entry.size,
                    chunk_bytes,
                });
            }
        }

        if !report.is_clean() {
            log_store_warn!("Integrity check found issues", count = report.issues.len());
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Entry, EntryKind};
    use crate::store::tests::open_temp;
    use crate::tree::Disposition;

    fn put(store: &DataStore, path: &str, data: &[u8]) {
        store
            .create(path, Disposition::OpenAndOverwriteOrCreate, EntryKind::File, 0)
            .unwrap();
        store.write(path, 0, data).unwrap();
    }

    #[test]
    fn test_gc_on_clean_store() {
        let (_temp, store) = open_temp();
        put(&store, "/a", b"alive");
        let report = store.collect_garbage(false).unwrap();
        assert_eq!(report.total_chunks, 1);
        assert_eq!(report.referenced, 1);
        assert_eq!(report.orphaned, 0);
        assert_eq!(report.deleted, 0);
    }

    #[test]
    fn test_gc_removes_only_unreferenced() {
        let (_temp, store) = open_temp();
        put(&store, "/keep", b"keep me");
        put(&store, "/drop", b"drop me");
        store.delete("/drop").unwrap();

        let dry = store.collect_garbage(true).unwrap();
        assert_eq!(dry.orphaned, 1);
        assert_eq!(dry.orphaned_bytes, 7);
        assert_eq!(dry.deleted, 0);
        assert_eq!(store.stats().unwrap().chunk_count, 2);

        let report = store.collect_garbage(false).unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(store.stats().unwrap().chunk_count, 1);
        assert_eq!(store.read_all("/keep").unwrap(), b"keep me");
    }

    #[test]
    fn test_gc_after_overwrite() {
        let (_temp, store) = open_temp();
        put(&store, "/f", b"version one");
        store.write("/f", 0, b"VERSION").unwrap();

        let report = store.collect_garbage(false).unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(store.read_all("/f").unwrap(), b"VERSION one");
    }

    #[test]
    fn test_check_clean_store() {
        let (_temp, store) = open_temp();
        store
            .create("/d", Disposition::CreateNew, EntryKind::Directory, 0)
            .unwrap();
        put(&store, "/d/f", b"data");

        let report = store.check().unwrap();
        assert!(report.is_clean(), "{:?}", report.issues);
        assert_eq!(report.entries_checked, 3);
        assert_eq!(report.chunks_checked, 1);
    }

    #[test]
    fn test_check_reports_damage() {
        let (_temp, store) = open_temp();
        put(&store, "/f", b"data");

        let mut wtxn = store.write_txn().unwrap();
        let mut entry = store.metadata.get_entry(&wtxn, "/f").unwrap();
        entry.size = 10;
        store.metadata.put_entry(&mut wtxn, "/f", &entry).unwrap();

        let mut dangling = Entry::new_file("g", 0, 0);
        dangling.size = 1;
        dangling.chunk_refs.push(ContentHash::compute(b"?"));
        store.metadata.put_entry(&mut wtxn, "/lost/g", &dangling).unwrap();
        wtxn.commit().unwrap();

        let report = store.check().unwrap();
        assert_eq!(report.issues.len(), 3);
        assert!(report.issues.contains(&FsckIssue::SizeMismatch {
            path: "/f".into(),
            size: 10,
            chunk_bytes: 4,
        }));
        assert!(report.issues.iter().any(|i| matches!(i, FsckIssue::MissingChunk { .. })));
        assert!(report.issues.iter().any(|i| matches!(i, FsckIssue::OrphanEntry { .. })));
    }
}
