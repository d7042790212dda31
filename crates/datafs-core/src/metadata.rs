//! Metadata store: normalized path key → [`Entry`].
//!
//! Keys are kept in LMDB's byte order, so every subtree is one contiguous
//! prefix range (`/docs/` ...). Listing, emptiness checks and renames are
//! prefix scans.

use heed::types::{SerdeJson, Str};
use heed::{Database, RoTxn, RwTxn};

use crate::entry::{DirEntry, Entry};
use crate::error::{FsError, Result};
use crate::path;

#[derive(Clone)]
pub struct MetadataStore {
    db: Database<Str, SerdeJson<Entry>>,
}

/// Map a heed error for `key`, surfacing undecodable records as `Corrupt`.
fn decode_err(key: &str, err: heed::Error) -> FsError {
    match err {
        heed::Error::Decoding(e) => FsError::Corrupt(format!("entry {key}: {e}")),
        other => FsError::Heed(other),
    }
}

impl MetadataStore {
    pub(crate) fn new(db: Database<Str, SerdeJson<Entry>>) -> Self {
        Self { db }
    }

    pub fn try_get(&self, rtxn: &RoTxn, key: &str) -> Result<Option<Entry>> {
        self.db.get(rtxn, key).map_err(|e| decode_err(key, e))
    }

    /// Load the entry at `key`; `NotFound` if absent.
    pub fn get_entry(&self, rtxn: &RoTxn, key: &str) -> Result<Entry> {
        self.try_get(rtxn, key)?
            .ok_or_else(|| FsError::NotFound(key.to_string()))
    }

    /// Load a directory entry; `NotDirectory` if `key` is a file.
    pub fn get_directory(&self, rtxn: &RoTxn, key: &str) -> Result<Entry> {
        let entry = self.get_entry(rtxn, key)?;
        if !entry.is_dir() {
            return Err(FsError::NotDirectory(key.to_string()));
        }
        Ok(entry)
    }

    /// Upsert the entry at `key`.
    pub fn put_entry(&self, wtxn: &mut RwTxn, key: &str, entry: &Entry) -> Result<()> {
        self.db.put(wtxn, key, entry)?;
        Ok(())
    }

    /// Remove the entry at `key`, returning it.
    ///
    /// Directories must be empty. The root check lives in the tree layer.
    pub fn delete_entry(&self, wtxn: &mut RwTxn, key: &str) -> Result<Entry> {
        let entry = self.get_entry(wtxn, key)?;
        if entry.is_dir() && self.has_children(wtxn, key)? {
            return Err(FsError::DirectoryNotEmpty(key.to_string()));
        }
        self.db.delete(wtxn, key)?;
        Ok(entry)
    }

    /// Entries exactly one segment below `key`, ordered by key.
    pub fn list_children(&self, rtxn: &RoTxn, key: &str) -> Result<Vec<DirEntry>> {
        self.get_directory(rtxn, key)?;

        let prefix = path::descendant_prefix(key);
        let mut children = Vec::new();
        for item in self.db.prefix_iter(rtxn, &prefix)? {
            let (child, entry) = item.map_err(|e| decode_err(key, e))?;
            if path::is_direct_child(&prefix, child) {
                children.push(DirEntry {
                    path: child.to_string(),
                    entry,
                });
            }
        }
        Ok(children)
    }

    /// True if anything is stored below `key`.
    pub fn has_children(&self, rtxn: &RoTxn, key: &str) -> Result<bool> {
        let prefix = path::descendant_prefix(key);
        for item in self.db.prefix_iter(rtxn, &prefix)? {
            let (child, _) = item.map_err(|e| decode_err(key, e))?;
            if child != key {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Every entry strictly below `key`, in key order.
    pub fn descendants(&self, rtxn: &RoTxn, key: &str) -> Result<Vec<(String, Entry)>> {
        let prefix = path::descendant_prefix(key);
        let mut out = Vec::new();
        for item in self.db.prefix_iter(rtxn, &prefix)? {
            let (child, entry) = item.map_err(|e| decode_err(key, e))?;
            if child != key {
                out.push((child.to_string(), entry));
            }
        }
        Ok(out)
    }

    /// Number of entries, root included.
    pub fn count(&self, rtxn: &RoTxn) -> Result<u64> {
        Ok(self.db.len(rtxn)?)
    }

    /// Every entry in the store, root included.
    pub fn all(&self, rtxn: &RoTxn) -> Result<Vec<(String, Entry)>> {
        let mut out = Vec::new();
        for item in self.db.iter(rtxn)? {
            let (key, entry) = item.map_err(|e| decode_err("<scan>", e))?;
            out.push((key.to_string(), entry));
        }
        Ok(out)
    }

    pub(crate) fn delete_raw(&self, wtxn: &mut RwTxn, key: &str) -> Result<bool> {
        Ok(self.db.delete(wtxn, key)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::open_temp;

    fn seed(store: &crate::DataStore, keys: &[(&str, bool)]) {
        let meta = store.metadata();
        let mut wtxn = store.write_txn().unwrap();
        for (key, dir) in keys {
            let name = path::file_name(key);
            let entry = if *dir {
                Entry::new_directory(name, 0, 1)
            } else {
                Entry::new_file(name, 0, 1)
            };
            meta.put_entry(&mut wtxn, key, &entry).unwrap();
        }
        wtxn.commit().unwrap();
    }

    #[test]
    fn test_prefix_listing_skips_lookalike_siblings() {
        let (_temp, store) = open_temp();
        seed(
            &store,
            &[
                ("/a", true),
                ("/a/x", false),
                ("/a/sub", true),
                ("/a/sub/y", false),
                ("/ab", false),
                ("/a-b", false),
            ],
        );

        let rtxn = store.read_txn().unwrap();
        let meta = store.metadata();
        let children: Vec<_> = meta
            .list_children(&rtxn, "/a")
            .unwrap()
            .into_iter()
            .map(|c| c.path)
            .collect();
        assert_eq!(children, vec!["/a/sub", "/a/x"]);

        let descendants: Vec<_> = meta
            .descendants(&rtxn, "/a")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(descendants, vec!["/a/sub", "/a/sub/y", "/a/x"]);
        assert!(meta.has_children(&rtxn, "/a/sub").unwrap());
        assert!(!meta.has_children(&rtxn, "/ab").unwrap());
    }

    #[test]
    fn test_delete_entry_rules() {
        let (_temp, store) = open_temp();
        seed(&store, &[("/d", true), ("/d/f", false)]);
        let meta = store.metadata();

        let mut wtxn = store.write_txn().unwrap();
        assert!(matches!(
            meta.delete_entry(&mut wtxn, "/d"),
            Err(FsError::DirectoryNotEmpty(_))
        ));
        assert!(matches!(
            meta.delete_entry(&mut wtxn, "/missing"),
            Err(FsError::NotFound(_))
        ));
        let removed = meta.delete_entry(&mut wtxn, "/d/f").unwrap();
        assert!(removed.is_file());
        meta.delete_entry(&mut wtxn, "/d").unwrap();
        wtxn.commit().unwrap();
    }

    #[test]
    fn test_undecodable_record_is_corrupt() {
        let (_temp, store) = open_temp();
        let raw: Database<Str, Str> = store.metadata().db.remap_data_type();

        let mut wtxn = store.write_txn().unwrap();
        raw.put(&mut wtxn, "/broken", "{not json").unwrap();
        wtxn.commit().unwrap();

        let rtxn = store.read_txn().unwrap();
        assert!(matches!(
            store.metadata().get_entry(&rtxn, "/broken"),
            Err(FsError::Corrupt(_))
        ));
    }
}
