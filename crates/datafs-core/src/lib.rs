//! # datafs-core
//!
//! Path-addressed file store on LMDB with content-addressed chunk storage.
//!
//! File and directory metadata is keyed by normalized path; file content is
//! split into fixed-size chunks keyed by their BLAKE3 hash, so identical data
//! is stored once no matter how many files reference it. Both live in one
//! LMDB environment and every mutation commits in a single transaction.
//!
//! ```no_run
//! use datafs_core::{DataStore, Disposition, EntryKind, StoreOptions};
//!
//! # fn main() -> datafs_core::Result<()> {
//! let store = DataStore::open("/tmp/datafs", StoreOptions::default())?;
//! store.create("/docs", Disposition::CreateNew, EntryKind::Directory, 0)?;
//! store.create("/docs/readme.txt", Disposition::CreateNew, EntryKind::File, 0)?;
//! store.write("/docs/readme.txt", 0, b"hello, world")?;
//! assert_eq!(store.read("/docs/readme.txt", 0, 5)?, b"hello");
//! # Ok(())
//! # }
//! ```

pub mod content;
pub mod entry;
pub mod error;
pub mod gc;
pub mod hash;
pub mod io;
pub mod metadata;
pub mod ops;
pub mod path;
pub mod store;
pub mod tree;

pub use content::ContentStore;
pub use entry::{attributes, now_nanos, DirEntry, Entry, EntryKind, SetTimes};
pub use error::{FsError, Result};
pub use gc::{FsckIssue, FsckReport, GcReport};
pub use hash::{ContentHash, HASH_LEN};
pub use io::ChunkLayout;
pub use metadata::MetadataStore;
pub use ops::FileSystem;
pub use path::PathPolicy;
pub use store::{
    DataStore, StoreOptions, StoreSettings, StoreStats, StoreUsage, FORMAT_VERSION,
    MAX_CHUNK_SIZE, MIN_CHUNK_SIZE,
};
pub use tree::{wildcard_match, Disposition, Opened};
