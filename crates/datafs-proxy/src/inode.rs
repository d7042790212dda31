//! Inode number ↔ store path table for the FUSE proxy.
//!
//! The store is addressed by path, the kernel by inode. Numbers are handed
//! out on first sight of a path and stay stable until the path goes away.

use std::collections::HashMap;

use datafs_core::path;

/// Inode of the root directory.
pub const ROOT_INO: u64 = 1;

pub struct InodeTable {
    paths: HashMap<u64, String>,
    inodes: HashMap<String, u64>,
    next: u64,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        let mut table = Self {
            paths: HashMap::new(),
            inodes: HashMap::new(),
            next: ROOT_INO + 1,
        };
        table.paths.insert(ROOT_INO, path::ROOT.to_string());
        table.inodes.insert(path::ROOT.to_string(), ROOT_INO);
        table
    }

    pub fn path(&self, ino: u64) -> Option<&str> {
        self.paths.get(&ino).map(String::as_str)
    }

    /// Inode for `key`, assigning a new one if needed.
    pub fn assign(&mut self, key: &str) -> u64 {
        if let Some(ino) = self.inodes.get(key) {
            return *ino;
        }
        let ino = self.next;
        self.next += 1;
        self.paths.insert(ino, key.to_string());
        self.inodes.insert(key.to_string(), ino);
        ino
    }

    /// Drop the mapping for a deleted path.
    pub fn remove(&mut self, key: &str) {
        if let Some(ino) = self.inodes.remove(key) {
            self.paths.remove(&ino);
        }
    }

    /// Follow a rename: `from` and everything below it now live under `to`.
    ///
    /// Inode numbers are kept so open handles stay valid. A mapping already
    /// present at the destination is replaced.
    pub fn rename(&mut self, from: &str, to: &str) {
        let moved: Vec<(String, u64)> = self
            .inodes
            .iter()
            .filter(|(key, _)| key.as_str() == from || path::is_descendant(key, from))
            .map(|(key, ino)| (key.clone(), *ino))
            .collect();

        self.remove(to);
        for (key, _) in &moved {
            self.inodes.remove(key);
        }
        for (key, ino) in moved {
            let new_key = path::rebase(&key, from, to);
            self.paths.insert(ino, new_key.clone());
            self.inodes.insert(new_key, ino);
        }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_preassigned() {
        let table = InodeTable::new();
        assert_eq!(table.path(ROOT_INO), Some("/"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_assign_is_stable() {
        let mut table = InodeTable::new();
        let a = table.assign("/a");
        let b = table.assign("/b");
        assert_ne!(a, b);
        assert_eq!(table.assign("/a"), a);
        assert_eq!(table.path(b), Some("/b"));
    }

    #[test]
    fn test_rename_moves_subtree_keeping_numbers() {
        let mut table = InodeTable::new();
        let dir = table.assign("/dir");
        let child = table.assign("/dir/child");
        let other = table.assign("/dirx");
        table.assign("/target");

        table.rename("/dir", "/target");

        assert_eq!(table.path(dir), Some("/target"));
        assert_eq!(table.path(child), Some("/target/child"));
        assert_eq!(table.path(other), Some("/dirx"));
        assert_eq!(table.assign("/target"), dir);
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_remove() {
        let mut table = InodeTable::new();
        let ino = table.assign("/gone");
        table.remove("/gone");
        assert_eq!(table.path(ino), None);
        assert_ne!(table.assign("/gone"), ino);
    }
}
