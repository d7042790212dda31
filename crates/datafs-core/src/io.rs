//! File content I/O over fixed-size chunks.
//!
//! Chunk `i` of a file covers `[i * C, min((i + 1) * C, size))` where `C` is
//! the store's chunk size, so every chunk but the last is exactly `C` bytes
//! and an offset maps to its chunk by division. Writes rebuild only the
//! chunks they touch; untouched chunks keep their hashes.

use datafs_config::{log_store_debug, log_store_warn};
use heed::{RoTxn, RwTxn};
use tracing::instrument;

use crate::entry::{now_nanos, Entry};
use crate::error::{FsError, Result};
use crate::hash::{ContentHash, HASH_LEN};
use crate::store::DataStore;

/// Bytes one chunk reference takes in an encoded entry (hex plus quoting).
const ENCODED_REF_LEN: u64 = 2 * HASH_LEN as u64 + 3;

/// Maps byte offsets to chunk indexes for one chunk size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    chunk_size: u64,
}

impl ChunkLayout {
    pub fn new(chunk_size: u64) -> Self {
        Self { chunk_size }
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Number of chunks needed to hold `size` bytes
    pub fn chunk_count(&self, size: u64) -> usize {
        size.div_ceil(self.chunk_size) as usize
    }

    /// Index of the chunk holding byte `offset`
    pub fn index_of(&self, offset: u64) -> usize {
        (offset / self.chunk_size) as usize
    }

    pub fn chunk_start(&self, idx: usize) -> u64 {
        idx as u64 * self.chunk_size
    }

    /// Length of chunk `idx` in a file of `size` bytes.
    pub fn chunk_len(&self, idx: usize, size: u64) -> u64 {
        let start = self.chunk_start(idx);
        size.saturating_sub(start).min(self.chunk_size)
    }
}

impl DataStore {
    /// Read up to `length` bytes at `offset`.
    ///
    /// Short reads happen only at end of file; reading at or past the end
    /// returns an empty buffer.
    #[instrument(skip(self), level = "debug")]
    pub fn read(&self, path: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        let key = self.key(path)?;
        let rtxn = self.read_txn()?;
        let entry = self.metadata.get_entry(&rtxn, &key)?;
        if entry.is_dir() {
            return Err(FsError::IsDirectory(key));
        }
        self.read_range(&rtxn, &key, &entry, offset, length)
    }

    /// Read a whole file.
    pub fn read_all(&self, path: &str) -> Result<Vec<u8>> {
        let key = self.key(path)?;
        let rtxn = self.read_txn()?;
        let entry = self.metadata.get_entry(&rtxn, &key)?;
        if entry.is_dir() {
            return Err(FsError::IsDirectory(key));
        }
        self.read_range(&rtxn, &key, &entry, 0, entry.size)
    }

    /// Write `data` at `offset`, extending the file if needed.
    ///
    /// A gap between the old end of file and `offset` reads back as zeros.
    /// Chunks, chunk references and size are committed in one transaction.
    #[instrument(skip(self, data), fields(len = data.len()), level = "debug")]
    pub fn write(&self, path: &str, offset: u64, data: &[u8]) -> Result<usize> {
        self.commit_write(path, Some(offset), data)?;
        Ok(data.len())
    }

    /// Write `data` at the end of the file and return the offset it landed at.
    ///
    /// The end of file is read inside the write transaction, so concurrent
    /// appends never overwrite each other.
    #[instrument(skip(self, data), fields(len = data.len()), level = "debug")]
    pub fn append(&self, path: &str, data: &[u8]) -> Result<u64> {
        self.commit_write(path, None, data)
    }

    fn commit_write(&self, path: &str, offset: Option<u64>, data: &[u8]) -> Result<u64> {
        let key = self.key(path)?;

        if data.is_empty() {
            let rtxn = self.read_txn()?;
            let entry = self.metadata.get_entry(&rtxn, &key)?;
            if entry.is_dir() {
                return Err(FsError::IsDirectory(key));
            }
            return Ok(offset.unwrap_or(entry.size));
        }

        let mut wtxn = self.write_txn()?;
        let mut entry = self.metadata.get_entry(&wtxn, &key)?;
        if entry.is_dir() {
            return Err(FsError::IsDirectory(key));
        }

        let offset = offset.unwrap_or(entry.size);
        self.write_chunks(&mut wtxn, &key, &mut entry, offset, data)?;
        entry.touch_modified(now_nanos());
        self.metadata.put_entry(&mut wtxn, &key, &entry)?;
        wtxn.commit()?;

        log_store_debug!(
            "Committed write",
            path = key.as_str(),
            offset = offset,
            len = data.len(),
            size = entry.size
        );
        Ok(offset)
    }

    /// Shrink or zero-extend a file to `new_size`.
    ///
    /// Truncating to the current size changes nothing, timestamps included.
    #[instrument(skip(self), level = "debug")]
    pub fn truncate(&self, path: &str, new_size: u64) -> Result<()> {
        self.commit_resize(path, new_size, true)
    }

    /// Truncate to `new_size` only if the file is currently larger.
    #[instrument(skip(self), level = "debug")]
    pub fn shrink_to(&self, path: &str, new_size: u64) -> Result<()> {
        self.commit_resize(path, new_size, false)
    }

    fn commit_resize(&self, path: &str, new_size: u64, grow: bool) -> Result<()> {
        let key = self.key(path)?;
        let mut wtxn = self.write_txn()?;
        let mut entry = self.metadata.get_entry(&wtxn, &key)?;
        if entry.is_dir() {
            return Err(FsError::IsDirectory(key));
        }
        if entry.size == new_size || (!grow && new_size > entry.size) {
            return Ok(());
        }

        self.resize_chunks(&mut wtxn, &key, &mut entry, new_size)?;
        entry.touch_modified(now_nanos());
        self.metadata.put_entry(&mut wtxn, &key, &entry)?;
        wtxn.commit()?;
        Ok(())
    }

    /// Refuse sizes whose chunk references alone could not fit in the map.
    /// Checked before any reference is built.
    fn check_capacity(&self, key: &str, size: u64) -> Result<()> {
        let refs = size.div_ceil(self.layout.chunk_size());
        if refs.saturating_mul(ENCODED_REF_LEN) > self.map_size() as u64 {
            log_store_warn!(
                "Size exceeds store capacity",
                path = key,
                size = size,
                map_size = self.map_size()
            );
            return Err(FsError::storage_full());
        }
        Ok(())
    }

    pub(crate) fn read_range(
        &self,
        rtxn: &RoTxn,
        key: &str,
        entry: &Entry,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>> {
        if offset >= entry.size || length == 0 {
            return Ok(Vec::new());
        }

        let end = entry.size.min(offset.saturating_add(length));
        let first = self.layout.index_of(offset);
        let last = self.layout.index_of(end - 1);

        let mut out = Vec::with_capacity((end - offset) as usize);
        for idx in first..=last {
            let chunk = self.load_chunk(rtxn, key, entry, idx)?;
            let start = self.layout.chunk_start(idx);
            let from = (offset.max(start) - start) as usize;
            let to = (end.min(start + chunk.len() as u64) - start) as usize;
            out.extend_from_slice(&chunk[from..to]);
        }
        Ok(out)
    }

    /// Fetch chunk `idx` of `entry`, checking it against the entry's layout.
    ///
    /// A dangling or wrongly sized reference is `Corrupt`, never a short read.
    fn load_chunk(&self, rtxn: &RoTxn, key: &str, entry: &Entry, idx: usize) -> Result<Vec<u8>> {
        let hash = entry.chunk_refs.get(idx).ok_or_else(|| {
            FsError::Corrupt(format!(
                "{key}: size {} needs chunk {idx} but only {} are referenced",
                entry.size,
                entry.chunk_refs.len()
            ))
        })?;

        let data = match self.content.get_chunk(rtxn, hash) {
            Ok(data) => data,
            Err(FsError::NotFound(_)) => {
                return Err(FsError::Corrupt(format!(
                    "{key}: references missing chunk {hash}"
                )))
            }
            Err(e) => return Err(e),
        };

        let expected = self.layout.chunk_len(idx, entry.size);
        if data.len() as u64 != expected {
            return Err(FsError::Corrupt(format!(
                "{key}: chunk {idx} is {} bytes, expected {expected}",
                data.len()
            )));
        }
        Ok(data)
    }

    /// Apply a write to `entry` inside `wtxn`. The caller persists `entry`.
    pub(crate) fn write_chunks(
        &self,
        wtxn: &mut RwTxn,
        key: &str,
        entry: &mut Entry,
        offset: u64,
        data: &[u8],
    ) -> Result<()> {
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| FsError::Unsupported(format!("{key}: write beyond u64 range")))?;

        self.check_capacity(key, end)?;

        let first = self.layout.index_of(offset);
        let last = self.layout.index_of(end - 1);

        // Zero-fill only the chunks before the first one written; the loop
        // below pads the chunks it rebuilds itself.
        self.extend_zeros(wtxn, key, entry, self.layout.chunk_start(first))?;

        let new_size = entry.size.max(end);

        for idx in first..=last {
            let start = self.layout.chunk_start(idx);
            let len = self.layout.chunk_len(idx, new_size);
            let chunk_end = start + len;
            let fully_covered = offset <= start && end >= chunk_end;

            let mut buf = if !fully_covered && idx < entry.chunk_refs.len() {
                self.load_chunk(wtxn, key, entry, idx)?
            } else {
                Vec::new()
            };
            buf.resize(len as usize, 0);

            let from = offset.max(start);
            let to = end.min(chunk_end);
            buf[(from - start) as usize..(to - start) as usize]
                .copy_from_slice(&data[(from - offset) as usize..(to - offset) as usize]);

            let hash = self.content.put_chunk(wtxn, &buf)?;
            set_ref(entry, idx, hash);
        }

        entry.size = new_size;
        Ok(())
    }

    /// Change the content length of `entry` inside `wtxn`.
    pub(crate) fn resize_chunks(
        &self,
        wtxn: &mut RwTxn,
        key: &str,
        entry: &mut Entry,
        new_size: u64,
    ) -> Result<()> {
        if new_size >= entry.size {
            self.check_capacity(key, new_size)?;
            return self.extend_zeros(wtxn, key, entry, new_size);
        }

        let count = self.layout.chunk_count(new_size);
        if count > 0 {
            let idx = count - 1;
            let new_len = self.layout.chunk_len(idx, new_size);
            if new_len != self.layout.chunk_len(idx, entry.size) {
                let mut buf = self.load_chunk(wtxn, key, entry, idx)?;
                buf.truncate(new_len as usize);
                let hash = self.content.put_chunk(wtxn, &buf)?;
                entry.chunk_refs[idx] = hash;
            }
        }

        // Dropped chunks stay in the content store until garbage collection.
        entry.chunk_refs.truncate(count);
        entry.size = new_size;
        Ok(())
    }

    /// Grow `entry` to `new_size` with zero bytes.
    ///
    /// A partial last chunk is padded and re-hashed; whole new chunks are the
    /// all-zero chunk, which is hashed and stored once per call.
    fn extend_zeros(
        &self,
        wtxn: &mut RwTxn,
        key: &str,
        entry: &mut Entry,
        new_size: u64,
    ) -> Result<()> {
        if new_size <= entry.size {
            return Ok(());
        }

        let chunk_size = self.layout.chunk_size();
        let first = self.layout.index_of(entry.size);
        let count = self.layout.chunk_count(new_size);
        let mut zero_hash: Option<ContentHash> = None;

        for idx in first..count {
            let len = self.layout.chunk_len(idx, new_size);
            let hash = if idx < entry.chunk_refs.len() {
                let mut buf = self.load_chunk(wtxn, key, entry, idx)?;
                buf.resize(len as usize, 0);
                self.content.put_chunk(wtxn, &buf)?
            } else if len == chunk_size {
                match zero_hash {
                    Some(hash) => hash,
                    None => {
                        let hash = self.content.put_chunk(wtxn, &vec![0u8; len as usize])?;
                        zero_hash = Some(hash);
                        hash
                    }
                }
            } else {
                self.content.put_chunk(wtxn, &vec![0u8; len as usize])?
            };
            set_ref(entry, idx, hash);
        }

        entry.size = new_size;
        Ok(())
    }
}

fn set_ref(entry: &mut Entry, idx: usize, hash: ContentHash) {
    if idx < entry.chunk_refs.len() {
        entry.chunk_refs[idx] = hash;
    } else {
        entry.chunk_refs.push(hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryKind;
    use crate::store::tests::open_temp;
    use crate::tree::Disposition;

    const C: usize = crate::store::MIN_CHUNK_SIZE;

    fn new_file(store: &DataStore, path: &str) {
        store
            .create(path, Disposition::CreateNew, EntryKind::File, 0)
            .unwrap();
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_layout_math() {
        let layout = ChunkLayout::new(10);
        assert_eq!(layout.chunk_count(0), 0);
        assert_eq!(layout.chunk_count(10), 1);
        assert_eq!(layout.chunk_count(11), 2);
        assert_eq!(layout.index_of(9), 0);
        assert_eq!(layout.index_of(10), 1);
        assert_eq!(layout.chunk_len(1, 15), 5);
        assert_eq!(layout.chunk_len(0, 15), 10);
        assert_eq!(layout.chunk_len(2, 15), 0);
    }

    #[test]
    fn test_roundtrip_multi_chunk() {
        let (_temp, store) = open_temp();
        new_file(&store, "/big.bin");
        let data = pattern(C * 3 + 17);

        assert_eq!(store.write("/big.bin", 0, &data).unwrap(), data.len());
        assert_eq!(store.read("/big.bin", 0, data.len() as u64).unwrap(), data);

        let entry = store.stat("/big.bin").unwrap();
        assert_eq!(entry.size, data.len() as u64);
        assert_eq!(entry.chunk_refs.len(), 4);
    }

    #[test]
    fn test_read_across_chunk_boundary() {
        let (_temp, store) = open_temp();
        new_file(&store, "/f");
        let data = pattern(C * 2);
        store.write("/f", 0, &data).unwrap();

        let got = store.read("/f", (C - 3) as u64, 6).unwrap();
        assert_eq!(got, &data[C - 3..C + 3]);
    }

    #[test]
    fn test_short_read_at_eof() {
        let (_temp, store) = open_temp();
        new_file(&store, "/f");
        store.write("/f", 0, b"hello").unwrap();

        assert_eq!(store.read("/f", 3, 100).unwrap(), b"lo");
        assert!(store.read("/f", 5, 10).unwrap().is_empty());
        assert!(store.read("/f", 500, 10).unwrap().is_empty());
    }

    #[test]
    fn test_partial_overwrite_keeps_surrounding_bytes() {
        let (_temp, store) = open_temp();
        new_file(&store, "/f");
        let mut data = pattern(C * 2);
        store.write("/f", 0, &data).unwrap();
        let before = store.stat("/f").unwrap();

        store.write("/f", 10, b"XYZ").unwrap();
        data[10..13].copy_from_slice(b"XYZ");

        assert_eq!(store.read_all("/f").unwrap(), data);
        let after = store.stat("/f").unwrap();
        // only the first chunk was rebuilt
        assert_ne!(before.chunk_refs[0], after.chunk_refs[0]);
        assert_eq!(before.chunk_refs[1], after.chunk_refs[1]);
    }

    #[test]
    fn test_write_past_eof_zero_fills_gap() {
        let (_temp, store) = open_temp();
        new_file(&store, "/sparse");
        store.write("/sparse", 0, b"ab").unwrap();
        let offset = (C * 2 + 5) as u64;
        store.write("/sparse", offset, b"cd").unwrap();

        let content = store.read_all("/sparse").unwrap();
        assert_eq!(content.len(), C * 2 + 7);
        assert_eq!(&content[..2], b"ab");
        assert!(content[2..C * 2 + 5].iter().all(|b| *b == 0));
        assert_eq!(&content[C * 2 + 5..], b"cd");
    }

    #[test]
    fn test_append_to_partial_last_chunk() {
        let (_temp, store) = open_temp();
        new_file(&store, "/log");
        store.write("/log", 0, b"one ").unwrap();
        store.write("/log", 4, b"two").unwrap();
        assert_eq!(store.read_all("/log").unwrap(), b"one two");
    }

    #[test]
    fn test_zero_length_write_is_noop() {
        let (_temp, store) = open_temp();
        new_file(&store, "/f");
        assert_eq!(store.write("/f", 100, b"").unwrap(), 0);
        assert_eq!(store.stat("/f").unwrap().size, 0);
    }

    #[test]
    fn test_read_write_directory_fails() {
        let (_temp, store) = open_temp();
        store
            .create("/d", Disposition::CreateNew, EntryKind::Directory, 0)
            .unwrap();
        assert!(matches!(store.read("/d", 0, 1), Err(FsError::IsDirectory(_))));
        assert!(matches!(store.write("/d", 0, b"x"), Err(FsError::IsDirectory(_))));
        assert!(matches!(store.truncate("/d", 0), Err(FsError::IsDirectory(_))));
    }

    #[test]
    fn test_missing_file() {
        let (_temp, store) = open_temp();
        assert!(matches!(store.read("/nope", 0, 1), Err(FsError::NotFound(_))));
        assert!(matches!(store.write("/nope", 0, b"x"), Err(FsError::NotFound(_))));
    }

    #[test]
    fn test_truncate_shrink_rechunks_tail() {
        let (_temp, store) = open_temp();
        new_file(&store, "/f");
        let data = pattern(C * 2 + 100);
        store.write("/f", 0, &data).unwrap();

        store.truncate("/f", (C + 10) as u64).unwrap();
        let entry = store.stat("/f").unwrap();
        assert_eq!(entry.size, (C + 10) as u64);
        assert_eq!(entry.chunk_refs.len(), 2);
        assert_eq!(store.read_all("/f").unwrap(), &data[..C + 10]);
    }

    #[test]
    fn test_truncate_extend_reads_zeros() {
        let (_temp, store) = open_temp();
        new_file(&store, "/f");
        store.write("/f", 0, b"abc").unwrap();

        store.truncate("/f", (C * 3) as u64).unwrap();
        let content = store.read_all("/f").unwrap();
        assert_eq!(&content[..3], b"abc");
        assert!(content[3..].iter().all(|b| *b == 0));
        assert_eq!(store.read("/f", (C * 3 - 1) as u64, 1).unwrap(), vec![0]);

        // whole zero chunks share one hash
        let entry = store.stat("/f").unwrap();
        assert_eq!(entry.chunk_refs[1], entry.chunk_refs[2]);
    }

    #[test]
    fn test_truncate_to_same_size_leaves_entry_untouched() {
        let (_temp, store) = open_temp();
        new_file(&store, "/f");
        store.write("/f", 0, b"abc").unwrap();
        store.truncate("/f", 0).unwrap();
        let first = store.stat("/f").unwrap();

        store.truncate("/f", 0).unwrap();
        assert_eq!(store.stat("/f").unwrap(), first);
        assert!(first.chunk_refs.is_empty());
    }

    #[test]
    fn test_dangling_reference_is_corrupt() {
        let (_temp, store) = open_temp();
        new_file(&store, "/f");
        store.write("/f", 0, b"abc").unwrap();

        // Point the entry at a chunk that was never stored.
        let mut wtxn = store.write_txn().unwrap();
        let mut entry = store.metadata.get_entry(&wtxn, "/f").unwrap();
        entry.chunk_refs[0] = ContentHash::compute(b"never stored");
        store.metadata.put_entry(&mut wtxn, "/f", &entry).unwrap();
        wtxn.commit().unwrap();

        assert!(matches!(store.read("/f", 0, 3), Err(FsError::Corrupt(_))));
    }

    #[test]
    fn test_sparse_write_leaves_no_orphans() {
        let (_temp, store) = open_temp();
        new_file(&store, "/sparse");
        let head = pattern(C);
        store.write("/sparse", 0, &head).unwrap();
        store.write("/sparse", (C * 3 + 10) as u64, b"x").unwrap();

        let report = store.collect_garbage(true).unwrap();
        assert_eq!(report.orphaned, 0);
        let content = store.read_all("/sparse").unwrap();
        assert_eq!(content.len(), C * 3 + 11);
        assert_eq!(&content[..C], &head[..]);
        assert_eq!(content[C * 3 + 10], b'x');
        assert!(content[C..C * 3 + 10].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_append_returns_landing_offset() {
        let (_temp, store) = open_temp();
        new_file(&store, "/log");
        assert_eq!(store.append("/log", b"one ").unwrap(), 0);
        assert_eq!(store.append("/log", b"two").unwrap(), 4);
        assert_eq!(store.append("/log", b"").unwrap(), 7);
        assert_eq!(store.read_all("/log").unwrap(), b"one two");
    }

    #[test]
    fn test_shrink_to_never_grows() {
        let (_temp, store) = open_temp();
        new_file(&store, "/f");
        store.write("/f", 0, b"0123456789").unwrap();

        store.shrink_to("/f", 100).unwrap();
        assert_eq!(store.stat("/f").unwrap().size, 10);
        store.shrink_to("/f", 4).unwrap();
        assert_eq!(store.read_all("/f").unwrap(), b"0123");
    }

    #[test]
    fn test_sizes_beyond_map_are_storage_full() {
        let (_temp, store) = open_temp();
        new_file(&store, "/huge");
        store.write("/huge", 0, b"keep").unwrap();
        let before = store.stat("/huge").unwrap();

        let err = store.truncate("/huge", 1 << 46).unwrap_err();
        assert!(err.is_storage_full());
        let err = store.write("/huge", 1 << 46, b"x").unwrap_err();
        assert!(err.is_storage_full());

        let after = store.stat("/huge").unwrap();
        assert_eq!(after.size, 4);
        assert_eq!(after.chunk_refs, before.chunk_refs);
        assert_eq!(store.read_all("/huge").unwrap(), b"keep");
    }
}
