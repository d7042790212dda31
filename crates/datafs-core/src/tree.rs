//! Tree operations: disposition-driven create/open, listing, delete, rename
//! and metadata updates.
//!
//! Each mutating operation runs in exactly one write transaction. Readers
//! see the tree before or after it, never in between.

use datafs_config::{log_store_debug, log_store_info};
use heed::RwTxn;
use tracing::instrument;

use crate::entry::{now_nanos, DirEntry, Entry, EntryKind, SetTimes};
use crate::error::{FsError, Result};
use crate::path::{self, PathPolicy};
use crate::store::DataStore;

/// What to do depending on whether the target path already exists.
///
/// Variants follow the Windows `FILE_SUPERSEDE..FILE_OVERWRITE_IF` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Replace an existing entry with an empty one, or create
    CreateOrReplace,
    /// Open, failing if missing
    OpenExisting,
    /// Create, failing if present
    CreateNew,
    /// Open if present, otherwise create
    OpenOrCreate,
    /// Truncate an existing file, failing if missing
    OpenAndOverwrite,
    /// Truncate if present, otherwise create
    OpenAndOverwriteOrCreate,
}

impl Disposition {
    pub const ALL: [Disposition; 6] = [
        Disposition::CreateOrReplace,
        Disposition::OpenExisting,
        Disposition::CreateNew,
        Disposition::OpenOrCreate,
        Disposition::OpenAndOverwrite,
        Disposition::OpenAndOverwriteOrCreate,
    ];

    /// Decode a raw Dokan create disposition (0..=5).
    pub fn from_raw(raw: u32) -> Result<Self> {
        Self::ALL
            .get(raw as usize)
            .copied()
            .ok_or_else(|| FsError::Unsupported(format!("create disposition {raw}")))
    }

    pub fn as_raw(self) -> u32 {
        match self {
            Disposition::CreateOrReplace => 0,
            Disposition::OpenExisting => 1,
            Disposition::CreateNew => 2,
            Disposition::OpenOrCreate => 3,
            Disposition::OpenAndOverwrite => 4,
            Disposition::OpenAndOverwriteOrCreate => 5,
        }
    }

    /// True if a missing path is created rather than reported.
    pub fn creates_missing(self) -> bool {
        !matches!(
            self,
            Disposition::OpenExisting | Disposition::OpenAndOverwrite
        )
    }
}

/// Result of [`DataStore::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opened {
    /// Normalized key of the opened entry
    pub path: String,
    pub entry: Entry,
    /// False if the path already existed
    pub created: bool,
}

impl DataStore {
    /// Create or open `path` according to `disposition`.
    #[instrument(skip(self), level = "debug")]
    pub fn create(
        &self,
        path: &str,
        disposition: Disposition,
        kind: EntryKind,
        attributes: u32,
    ) -> Result<Opened> {
        let normalized = path::normalize(path)?;
        let key = self.policy().fold(&normalized);
        let name = path::file_name(&normalized);
        let now = now_nanos();

        let mut wtxn = self.write_txn()?;
        let existing = self.metadata.try_get(&wtxn, &key)?;

        let Some(mut entry) = existing else {
            if !disposition.creates_missing() {
                return Err(FsError::NotFound(key));
            }
            let entry = Entry::new(kind, name, attributes, now);
            self.insert_child(&mut wtxn, &key, &entry, now)?;
            wtxn.commit()?;
            log_store_debug!("Created entry", path = key.as_str(), dir = entry.is_dir());
            return Ok(Opened {
                path: key,
                entry,
                created: true,
            });
        };

        match disposition {
            Disposition::CreateNew => return Err(FsError::Exists(key)),
            Disposition::OpenExisting | Disposition::OpenOrCreate => {
                if kind == EntryKind::Directory && !entry.is_dir() {
                    return Err(FsError::NotDirectory(key));
                }
                // read-only open: nothing to commit
            }
            Disposition::OpenAndOverwrite | Disposition::OpenAndOverwriteOrCreate => {
                if entry.is_dir() {
                    return Err(FsError::IsDirectory(key));
                }
                if kind == EntryKind::Directory {
                    return Err(FsError::NotDirectory(key));
                }
                entry.clear_content();
                entry.touch_modified(now);
                self.metadata.put_entry(&mut wtxn, &key, &entry)?;
                wtxn.commit()?;
            }
            Disposition::CreateOrReplace => {
                if path::is_root(&key) {
                    return Err(FsError::InvalidPath(key));
                }
                if entry.is_dir() && self.metadata.has_children(&wtxn, &key)? {
                    return Err(FsError::DirectoryNotEmpty(key));
                }
                entry = Entry::new(kind, name, attributes, now);
                self.metadata.put_entry(&mut wtxn, &key, &entry)?;
                wtxn.commit()?;
                log_store_debug!("Replaced entry", path = key.as_str());
            }
        }

        Ok(Opened {
            path: key,
            entry,
            created: false,
        })
    }

    pub fn stat(&self, path: &str) -> Result<Entry> {
        let key = self.key(path)?;
        let rtxn = self.read_txn()?;
        self.metadata.get_entry(&rtxn, &key)
    }

    pub fn exists(&self, path: &str) -> Result<bool> {
        let key = self.key(path)?;
        let rtxn = self.read_txn()?;
        Ok(self.metadata.try_get(&rtxn, &key)?.is_some())
    }

    /// Direct children of a directory, ordered by key.
    pub fn list_children(&self, path: &str) -> Result<Vec<DirEntry>> {
        let key = self.key(path)?;
        let rtxn = self.read_txn()?;
        self.metadata.list_children(&rtxn, &key)
    }

    /// Direct children whose name matches a `*`/`?` wildcard pattern.
    ///
    /// An empty pattern or `*` matches everything.
    pub fn find_children(&self, path: &str, pattern: &str) -> Result<Vec<DirEntry>> {
        let children = self.list_children(path)?;
        if pattern.is_empty() || pattern == "*" {
            return Ok(children);
        }

        let policy = self.policy();
        Ok(children
            .into_iter()
            .filter(|child| policy.matches(pattern, child.name()))
            .collect())
    }

    /// Remove a file or an empty directory.
    #[instrument(skip(self), level = "debug")]
    pub fn delete(&self, path: &str) -> Result<()> {
        let key = self.key(path)?;
        if path::is_root(&key) {
            return Err(FsError::InvalidPath(key));
        }

        let now = now_nanos();
        let mut wtxn = self.write_txn()?;
        self.metadata.delete_entry(&mut wtxn, &key)?;
        self.touch_parent(&mut wtxn, &key, now)?;
        wtxn.commit()?;

        log_store_debug!("Deleted entry", path = key.as_str());
        Ok(())
    }

    /// Move `src` (and its whole subtree) to `dst`.
    ///
    /// Every descendant key is rewritten in the same transaction as the
    /// entry itself.
    #[instrument(skip(self), level = "debug")]
    pub fn rename(&self, src: &str, dst: &str, replace_existing: bool) -> Result<()> {
        let src_key = self.key(src)?;
        let dst_normalized = path::normalize(dst)?;
        let dst_key = self.policy().fold(&dst_normalized);
        let dst_name = path::file_name(&dst_normalized);

        if path::is_root(&src_key) || path::is_root(&dst_key) {
            return Err(FsError::InvalidPath(format!("{src_key} -> {dst_key}")));
        }
        if path::is_descendant(&dst_key, &src_key) {
            return Err(FsError::InvalidPath(format!(
                "cannot move {src_key} into its own subtree"
            )));
        }

        let now = now_nanos();
        let mut wtxn = self.write_txn()?;
        let mut entry = self.metadata.get_entry(&wtxn, &src_key)?;

        if src_key == dst_key {
            // Only a case change in a case-insensitive store has any effect.
            if entry.name != dst_name {
                entry.name = dst_name.to_string();
                entry.touch_modified(now);
                self.metadata.put_entry(&mut wtxn, &src_key, &entry)?;
                wtxn.commit()?;
            }
            return Ok(());
        }

        if let Some(parent) = path::parent(&dst_key) {
            self.metadata.get_directory(&wtxn, parent)?;
        }

        if let Some(existing) = self.metadata.try_get(&wtxn, &dst_key)? {
            if !replace_existing {
                return Err(FsError::Exists(dst_key));
            }
            match (entry.is_dir(), existing.is_dir()) {
                (false, true) => return Err(FsError::IsDirectory(dst_key)),
                (true, false) => return Err(FsError::NotDirectory(dst_key)),
                (true, true) if self.metadata.has_children(&wtxn, &dst_key)? => {
                    return Err(FsError::DirectoryNotEmpty(dst_key))
                }
                _ => {}
            }
            self.metadata.delete_raw(&mut wtxn, &dst_key)?;
        }

        let descendants = if entry.is_dir() {
            self.metadata.descendants(&wtxn, &src_key)?
        } else {
            Vec::new()
        };

        self.metadata.delete_raw(&mut wtxn, &src_key)?;
        for (key, _) in &descendants {
            self.metadata.delete_raw(&mut wtxn, key)?;
        }

        entry.name = dst_name.to_string();
        entry.touch_modified(now);
        self.metadata.put_entry(&mut wtxn, &dst_key, &entry)?;
        for (key, child) in &descendants {
            let moved = path::rebase(key, &src_key, &dst_key);
            self.metadata.put_entry(&mut wtxn, &moved, child)?;
        }

        self.touch_parent(&mut wtxn, &src_key, now)?;
        self.touch_parent(&mut wtxn, &dst_key, now)?;
        wtxn.commit()?;

        log_store_info!(
            "Renamed entry",
            from = src_key.as_str(),
            to = dst_key.as_str(),
            descendants = descendants.len()
        );
        Ok(())
    }

    /// Set any of the three timestamps explicitly. Returns the updated entry.
    pub fn set_times(&self, path: &str, times: SetTimes) -> Result<Entry> {
        self.update_entry(path, |entry| entry.apply_times(&times))
    }

    /// Replace the attribute bits. Returns the updated entry.
    pub fn set_attributes(&self, path: &str, attributes: u32) -> Result<Entry> {
        self.update_entry(path, |entry| entry.attributes = attributes)
    }

    fn update_entry<F>(&self, path: &str, apply: F) -> Result<Entry>
    where
        F: FnOnce(&mut Entry),
    {
        let key = self.key(path)?;
        let mut wtxn = self.write_txn()?;
        let mut entry = self.metadata.get_entry(&wtxn, &key)?;
        apply(&mut entry);
        self.metadata.put_entry(&mut wtxn, &key, &entry)?;
        wtxn.commit()?;
        Ok(entry)
    }

    /// Insert a new entry after checking its parent is a directory.
    fn insert_child(&self, wtxn: &mut RwTxn, key: &str, entry: &Entry, now: u64) -> Result<()> {
        let parent = path::parent(key).ok_or_else(|| FsError::Exists(key.to_string()))?;
        let mut parent_entry = self.metadata.get_directory(wtxn, parent)?;
        parent_entry.touch_modified(now);
        self.metadata.put_entry(wtxn, parent, &parent_entry)?;
        self.metadata.put_entry(wtxn, key, entry)
    }

    fn touch_parent(&self, wtxn: &mut RwTxn, key: &str, now: u64) -> Result<()> {
        let Some(parent) = path::parent(key) else {
            return Ok(());
        };
        if let Some(mut entry) = self.metadata.try_get(wtxn, parent)? {
            entry.touch_modified(now);
            self.metadata.put_entry(wtxn, parent, &entry)?;
        }
        Ok(())
    }
}

/// Match `name` against a wildcard pattern where `*` is any run of
/// characters and `?` exactly one.
///
/// As in DOS, `*.*` matches every name, including names without a dot.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    if pattern == "*.*" {
        return true;
    }

    let pattern: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();

    let (mut p, mut n) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while n < name.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == name[n]) {
            p += 1;
            n += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, n));
            p += 1;
        } else if let Some((sp, sn)) = star {
            p = sp + 1;
            n = sn + 1;
            star = Some((sp, sn + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}

impl PathPolicy {
    /// Case-aware wildcard match of a single name.
    pub fn matches(&self, pattern: &str, name: &str) -> bool {
        wildcard_match(&self.fold(pattern), &self.fold(name))
    }
}
