//! Capability contract consumed by the platform proxies.
//!
//! Proxies are generic over [`FileSystem`] and only ever see normalized
//! path strings, [`Entry`] records and [`FsError`](crate::FsError)s. They
//! never touch transactions.

use crate::entry::{DirEntry, Entry, EntryKind, SetTimes};
use crate::error::Result;
use crate::store::{DataStore, StoreUsage};
use crate::tree::{Disposition, Opened};

pub trait FileSystem: Send + Sync {
    /// Normalize a driver-supplied path into the key the store uses for it
    fn resolve(&self, path: &str) -> Result<String>;

    fn case_sensitive(&self) -> bool;

    fn create(
        &self,
        path: &str,
        disposition: Disposition,
        kind: EntryKind,
        attributes: u32,
    ) -> Result<Opened>;

    fn stat(&self, path: &str) -> Result<Entry>;

    fn list(&self, path: &str) -> Result<Vec<DirEntry>>;

    /// Children of `path` matching a `*`/`?` wildcard pattern
    fn find(&self, path: &str, pattern: &str) -> Result<Vec<DirEntry>>;

    fn read(&self, path: &str, offset: u64, length: u64) -> Result<Vec<u8>>;

    /// Returns the number of bytes written, always `data.len()` on success
    fn write(&self, path: &str, offset: u64, data: &[u8]) -> Result<usize>;

    /// Write at the end of file, resolved atomically with the write.
    /// Returns the offset the data landed at.
    fn append(&self, path: &str, data: &[u8]) -> Result<u64>;

    fn truncate(&self, path: &str, size: u64) -> Result<()>;

    /// Truncate only if the file is larger than `size`
    fn shrink_to(&self, path: &str, size: u64) -> Result<()>;

    fn delete(&self, path: &str) -> Result<()>;

    fn rename(&self, src: &str, dst: &str, replace_existing: bool) -> Result<()>;

    fn set_times(&self, path: &str, times: SetTimes) -> Result<Entry>;

    fn set_attributes(&self, path: &str, attributes: u32) -> Result<Entry>;

    /// Usage figures for statfs / free-space queries
    fn usage(&self) -> Result<StoreUsage>;

    /// Force committed data to disk
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

impl FileSystem for DataStore {
    fn resolve(&self, path: &str) -> Result<String> {
        self.key(path)
    }

    fn case_sensitive(&self) -> bool {
        self.policy().case_sensitive
    }

    fn create(
        &self,
        path: &str,
        disposition: Disposition,
        kind: EntryKind,
        attributes: u32,
    ) -> Result<Opened> {
        DataStore::create(self, path, disposition, kind, attributes)
    }

    fn stat(&self, path: &str) -> Result<Entry> {
        DataStore::stat(self, path)
    }

    fn list(&self, path: &str) -> Result<Vec<DirEntry>> {
        self.list_children(path)
    }

    fn find(&self, path: &str, pattern: &str) -> Result<Vec<DirEntry>> {
        self.find_children(path, pattern)
    }

    fn read(&self, path: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        DataStore::read(self, path, offset, length)
    }

    fn write(&self, path: &str, offset: u64, data: &[u8]) -> Result<usize> {
        DataStore::write(self, path, offset, data)
    }

    fn append(&self, path: &str, data: &[u8]) -> Result<u64> {
        DataStore::append(self, path, data)
    }

    fn truncate(&self, path: &str, size: u64) -> Result<()> {
        DataStore::truncate(self, path, size)
    }

    fn shrink_to(&self, path: &str, size: u64) -> Result<()> {
        DataStore::shrink_to(self, path, size)
    }

    fn delete(&self, path: &str) -> Result<()> {
        DataStore::delete(self, path)
    }

    fn rename(&self, src: &str, dst: &str, replace_existing: bool) -> Result<()> {
        DataStore::rename(self, src, dst, replace_existing)
    }

    fn set_times(&self, path: &str, times: SetTimes) -> Result<Entry> {
        DataStore::set_times(self, path, times)
    }

    fn set_attributes(&self, path: &str, attributes: u32) -> Result<Entry> {
        DataStore::set_attributes(self, path, attributes)
    }

    fn usage(&self) -> Result<StoreUsage> {
        DataStore::usage(self)
    }

    fn flush(&self) -> Result<()> {
        self.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::open_temp;

    fn roundtrip<F: FileSystem>(fs: &F) {
        assert_eq!(fs.resolve("\\x\\").unwrap(), "/x");
        assert!(fs.case_sensitive());
        fs.create("/x", Disposition::CreateNew, EntryKind::File, 0)
            .unwrap();
        assert_eq!(fs.write("/x", 0, b"through the trait").unwrap(), 17);
        assert_eq!(fs.read("/x", 8, 3).unwrap(), b"the");
        assert_eq!(fs.list("/").unwrap().len(), 1);
        assert_eq!(fs.find("/", "*.y").unwrap().len(), 0);
        assert_eq!(fs.append("/x", b"!").unwrap(), 17);
        fs.shrink_to("/x", 64).unwrap();
        assert_eq!(fs.stat("/x").unwrap().size, 18);
        fs.truncate("/x", 3).unwrap();
        assert_eq!(fs.stat("/x").unwrap().size, 3);
        fs.rename("/x", "/y", false).unwrap();
        fs.delete("/y").unwrap();
        assert_eq!(fs.usage().unwrap().entries, 1);
        fs.flush().unwrap();
    }

    #[test]
    fn test_data_store_is_a_file_system() {
        let (_temp, store) = open_temp();
        roundtrip(&store);
    }

    #[test]
    fn test_usable_as_trait_object() {
        let (_temp, store) = open_temp();
        let fs: Box<dyn FileSystem> = Box::new(store);
        fs.create("/d", Disposition::CreateNew, EntryKind::Directory, 0)
            .unwrap();
        assert!(fs.stat("/d").unwrap().is_dir());
    }
}
