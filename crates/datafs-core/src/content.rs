//! Content store: content hash → immutable chunk bytes.
//!
//! Append-only and deduplicating. Putting bytes that are already stored is a
//! no-op that returns the existing hash. Chunk boundaries are decided by the
//! I/O layer; this store only ever sees opaque blobs.
//!
//! The total byte count of stored chunks is kept in a side database and
//! updated in the same transaction as the chunk itself, so usage queries
//! never scan the chunks.

use heed::types::{Bytes, SerdeJson, Str};
use heed::{Database, RoTxn, RwTxn};
use tracing::instrument;

use crate::error::{FsError, Result};
use crate::hash::ContentHash;

const STORED_BYTES_KEY: &str = "stored_bytes";

#[derive(Clone)]
pub struct ContentStore {
    db: Database<Bytes, Bytes>,
    usage: Database<Str, SerdeJson<u64>>,
}

impl ContentStore {
    pub(crate) fn new(db: Database<Bytes, Bytes>, usage: Database<Str, SerdeJson<u64>>) -> Self {
        Self { db, usage }
    }

    /// Seed the byte counter from a full scan if this store predates it.
    pub(crate) fn init_usage(&self, wtxn: &mut RwTxn) -> Result<()> {
        if self.usage.get(wtxn, STORED_BYTES_KEY)?.is_none() {
            let total: u64 = self.list(wtxn)?.iter().map(|(_, len)| len).sum();
            self.usage.put(wtxn, STORED_BYTES_KEY, &total)?;
        }
        Ok(())
    }

    /// Bytes held by all stored chunks.
    pub fn stored_bytes(&self, rtxn: &RoTxn) -> Result<u64> {
        Ok(self.usage.get(rtxn, STORED_BYTES_KEY)?.unwrap_or(0))
    }

    fn adjust_stored_bytes(&self, wtxn: &mut RwTxn, added: u64, removed: u64) -> Result<()> {
        let current = self.stored_bytes(wtxn)?;
        let next = current.saturating_add(added).saturating_sub(removed);
        self.usage.put(wtxn, STORED_BYTES_KEY, &next)?;
        Ok(())
    }

    /// Store a chunk, returning its content hash.
    ///
    /// Deduplication: if the hash is already present nothing is written.
    #[instrument(skip(self, wtxn, data), fields(len = data.len()), level = "debug")]
    pub fn put_chunk(&self, wtxn: &mut RwTxn, data: &[u8]) -> Result<ContentHash> {
        let hash = ContentHash::compute(data);
        if self.db.get(wtxn, &hash.as_bytes()[..])?.is_none() {
            self.db.put(wtxn, &hash.as_bytes()[..], data)?;
            self.adjust_stored_bytes(wtxn, data.len() as u64, 0)?;
        }
        Ok(hash)
    }

    /// Fetch a chunk by hash.
    ///
    /// The bytes are re-hashed on the way out; a mismatch means the store was
    /// damaged underneath us and is reported as `Corrupt`.
    pub fn get_chunk(&self, rtxn: &RoTxn, hash: &ContentHash) -> Result<Vec<u8>> {
        let data = self
            .db
            .get(rtxn, &hash.as_bytes()[..])?
            .ok_or_else(|| FsError::NotFound(format!("chunk {hash}")))?;

        let actual = ContentHash::compute(data);
        if actual != *hash {
            return Err(FsError::Corrupt(format!(
                "chunk {hash} hashes to {actual}"
            )));
        }
        Ok(data.to_vec())
    }

    /// Length of a stored chunk without copying it.
    pub fn chunk_len(&self, rtxn: &RoTxn, hash: &ContentHash) -> Result<Option<u64>> {
        Ok(self
            .db
            .get(rtxn, &hash.as_bytes()[..])?
            .map(|data| data.len() as u64))
    }

    pub fn contains(&self, rtxn: &RoTxn, hash: &ContentHash) -> Result<bool> {
        Ok(self.db.get(rtxn, &hash.as_bytes()[..])?.is_some())
    }

    /// Remove a chunk. Only garbage collection calls this.
    pub(crate) fn delete_chunk(&self, wtxn: &mut RwTxn, hash: &ContentHash) -> Result<bool> {
        let Some(len) = self.chunk_len(wtxn, hash)? else {
            return Ok(false);
        };
        self.db.delete(wtxn, &hash.as_bytes()[..])?;
        self.adjust_stored_bytes(wtxn, 0, len)?;
        Ok(true)
    }

    /// Number of unique chunks stored
    pub fn chunk_count(&self, rtxn: &RoTxn) -> Result<u64> {
        Ok(self.db.len(rtxn)?)
    }

    /// Every stored hash with its chunk length.
    pub fn list(&self, rtxn: &RoTxn) -> Result<Vec<(ContentHash, u64)>> {
        let mut out = Vec::new();
        for item in self.db.iter(rtxn)? {
            let (key, data) = item?;
            let hash = ContentHash::from_slice(key).ok_or_else(|| {
                FsError::Corrupt(format!("chunk key of {} bytes", key.len()))
            })?;
            out.push((hash, data.len() as u64));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::open_temp;

    #[test]
    fn test_put_is_idempotent() {
        let (_temp, store) = open_temp();
        let content = store.content();

        let mut wtxn = store.write_txn().unwrap();
        let first = content.put_chunk(&mut wtxn, b"same bytes").unwrap();
        let second = content.put_chunk(&mut wtxn, b"same bytes").unwrap();
        wtxn.commit().unwrap();

        assert_eq!(first, second);
        let rtxn = store.read_txn().unwrap();
        assert_eq!(content.chunk_count(&rtxn).unwrap(), 1);
        assert_eq!(content.get_chunk(&rtxn, &first).unwrap(), b"same bytes");
        assert_eq!(content.chunk_len(&rtxn, &first).unwrap(), Some(10));
        assert_eq!(content.stored_bytes(&rtxn).unwrap(), 10);
    }

    #[test]
    fn test_stored_bytes_follow_deletes() {
        let (_temp, store) = open_temp();
        let content = store.content();

        let mut wtxn = store.write_txn().unwrap();
        let keep = content.put_chunk(&mut wtxn, b"keep me").unwrap();
        let drop = content.put_chunk(&mut wtxn, b"drop").unwrap();
        assert!(content.delete_chunk(&mut wtxn, &drop).unwrap());
        assert!(!content.delete_chunk(&mut wtxn, &drop).unwrap());
        wtxn.commit().unwrap();

        let rtxn = store.read_txn().unwrap();
        assert!(content.contains(&rtxn, &keep).unwrap());
        assert_eq!(content.stored_bytes(&rtxn).unwrap(), 7);
    }

    #[test]
    fn test_get_unknown_chunk() {
        let (_temp, store) = open_temp();
        let rtxn = store.read_txn().unwrap();
        let hash = ContentHash::compute(b"absent");
        assert!(!store.content().contains(&rtxn, &hash).unwrap());
        assert!(matches!(
            store.content().get_chunk(&rtxn, &hash),
            Err(FsError::NotFound(_))
        ));
    }

    #[test]
    fn test_tampered_chunk_is_corrupt() {
        let (_temp, store) = open_temp();
        let content = store.content();
        let hash = ContentHash::compute(b"original");

        // Store bytes under a key they do not hash to.
        let mut wtxn = store.write_txn().unwrap();
        content
            .db
            .put(&mut wtxn, &hash.as_bytes()[..], b"tampered")
            .unwrap();
        wtxn.commit().unwrap();

        let rtxn = store.read_txn().unwrap();
        assert!(matches!(
            content.get_chunk(&rtxn, &hash),
            Err(FsError::Corrupt(_))
        ));
    }

    #[test]
    fn test_delete_and_list() {
        let (_temp, store) = open_temp();
        let content = store.content();

        let mut wtxn = store.write_txn().unwrap();
        let a = content.put_chunk(&mut wtxn, b"aa").unwrap();
        let b = content.put_chunk(&mut wtxn, b"bbb").unwrap();
        assert!(content.delete_chunk(&mut wtxn, &a).unwrap());
        assert!(!content.delete_chunk(&mut wtxn, &a).unwrap());
        wtxn.commit().unwrap();

        let rtxn = store.read_txn().unwrap();
        assert_eq!(content.list(&rtxn).unwrap(), vec![(b, 3)]);
    }
}
