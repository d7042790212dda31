//! LMDB-backed store: environment setup, persisted settings, statistics.
//!
//! One environment holds four named databases:
//! - `metadata`: path key → JSON [`Entry`]
//! - `chunks`: content hash → raw chunk bytes
//! - `settings`: `"store"` → [`StoreSettings`]
//! - `usage`: running totals kept by the content store
//!
//! Metadata and content live in the same environment so a single write
//! transaction covers both; a write either lands completely or not at all.

use std::path::{Path, PathBuf};

use datafs_config::{log_store_debug, log_store_info, log_store_warn, Config};
use heed::types::{SerdeJson, Str};
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use serde::{Deserialize, Serialize};

use crate::content::ContentStore;
use crate::entry::{attributes, now_nanos, Entry};
use crate::error::{FsError, Result};
use crate::io::ChunkLayout;
use crate::metadata::MetadataStore;
use crate::path::{self, PathPolicy};

/// Smallest accepted chunk size (4 KiB)
pub const MIN_CHUNK_SIZE: usize = 4 * 1024;

/// Largest accepted chunk size (16 MiB)
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// On-disk format version written into new stores
pub const FORMAT_VERSION: u32 = 1;

const SETTINGS_KEY: &str = "store";

/// Options for opening a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// LMDB map size in bytes
    pub map_size: usize,
    pub max_readers: u32,
    /// Chunk size for a newly created store
    pub chunk_size: usize,
    /// Path case policy for a newly created store
    pub case_sensitive: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            map_size: 1024 * 1024 * 1024,
            max_readers: 126,
            chunk_size: datafs_config::DEFAULT_CHUNK_SIZE,
            case_sensitive: true,
        }
    }
}

impl StoreOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            map_size: config.storage.map_size,
            max_readers: config.storage.max_readers,
            chunk_size: config.chunking.chunk_size,
            case_sensitive: config.mount.case_sensitive,
        }
    }
}

/// Settings fixed when a store is created.
///
/// Read back on every open and authoritative over [`StoreOptions`], since
/// existing chunk references and keys depend on them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSettings {
    pub format_version: u32,
    pub chunk_size: u64,
    pub case_sensitive: bool,
    #[serde(default)]
    pub created_at: u64,
}

/// Statistics about a store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub file_count: u64,
    pub dir_count: u64,
    /// Sum of file sizes
    pub logical_bytes: u64,
    /// Unique chunks stored
    pub chunk_count: u64,
    /// Bytes held by unique chunks
    pub stored_bytes: u64,
}

impl StoreStats {
    /// Logical bytes per stored byte; 1.0 means no sharing at all.
    pub fn dedup_ratio(&self) -> f64 {
        if self.stored_bytes == 0 {
            1.0
        } else {
            self.logical_bytes as f64 / self.stored_bytes as f64
        }
    }
}

/// Usage figures cheap enough to answer every statfs call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreUsage {
    /// Files and directories, root included
    pub entries: u64,
    pub chunk_count: u64,
    pub stored_bytes: u64,
}

/// Handle to an opened store.
///
/// Cheap to clone; clones share the LMDB environment. Every operation opens
/// its own transaction, so a `DataStore` can be used from many threads.
#[derive(Clone)]
pub struct DataStore {
    env: Env,
    path: PathBuf,
    pub(crate) metadata: MetadataStore,
    pub(crate) content: ContentStore,
    settings: StoreSettings,
    policy: PathPolicy,
    pub(crate) layout: ChunkLayout,
    map_size: usize,
}

impl DataStore {
    /// Open or create a store in the directory `path`.
    ///
    /// Creates the databases and seeds the root directory on first open.
    pub fn open<P: AsRef<Path>>(path: P, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref();

        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&options.chunk_size) {
            return Err(FsError::Unsupported(format!(
                "chunk size {} outside {}..={}",
                options.chunk_size, MIN_CHUNK_SIZE, MAX_CHUNK_SIZE
            )));
        }

        std::fs::create_dir_all(path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(options.map_size)
                .max_readers(options.max_readers)
                .max_dbs(4)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let metadata_db: Database<Str, SerdeJson<Entry>> =
            env.create_database(&mut wtxn, Some("metadata"))?;
        let chunks_db = env.create_database(&mut wtxn, Some("chunks"))?;
        let settings_db: Database<Str, SerdeJson<StoreSettings>> =
            env.create_database(&mut wtxn, Some("settings"))?;
        let usage_db = env.create_database(&mut wtxn, Some("usage"))?;

        let now = now_nanos();
        let settings = match settings_db.get(&wtxn, SETTINGS_KEY)? {
            Some(existing) => {
                if existing.chunk_size != options.chunk_size as u64
                    || existing.case_sensitive != options.case_sensitive
                {
                    log_store_warn!(
                        "Store settings differ from requested options; keeping stored values",
                        chunk_size = existing.chunk_size,
                        case_sensitive = existing.case_sensitive
                    );
                }
                existing
            }
            None => {
                let created = StoreSettings {
                    format_version: FORMAT_VERSION,
                    chunk_size: options.chunk_size as u64,
                    case_sensitive: options.case_sensitive,
                    created_at: now,
                };
                settings_db.put(&mut wtxn, SETTINGS_KEY, &created)?;
                created
            }
        };

        if settings.format_version > FORMAT_VERSION {
            return Err(FsError::Unsupported(format!(
                "store format version {} is newer than {}",
                settings.format_version, FORMAT_VERSION
            )));
        }

        let content = ContentStore::new(chunks_db, usage_db);
        content.init_usage(&mut wtxn)?;

        let metadata = MetadataStore::new(metadata_db);
        if metadata.try_get(&wtxn, path::ROOT)?.is_none() {
            let root = Entry::new_directory("", attributes::DIRECTORY, now);
            metadata.put_entry(&mut wtxn, path::ROOT, &root)?;
            log_store_debug!("Seeded root directory");
        }
        wtxn.commit()?;
        let map_size = env.info().map_size;

        log_store_info!(
            "Opened store",
            chunk_size = settings.chunk_size,
            case_sensitive = settings.case_sensitive
        );

        Ok(Self {
            env,
            path: path.to_path_buf(),
            metadata,
            content,
            policy: PathPolicy::new(settings.case_sensitive),
            layout: ChunkLayout::new(settings.chunk_size),
            settings,
            map_size,
        })
    }

    /// Open the store described by a loaded config.
    pub fn open_with_config(config: &Config) -> Result<Self> {
        Self::open(config.db_path(), StoreOptions::from_config(config))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn chunk_size(&self) -> u64 {
        self.settings.chunk_size
    }

    pub fn policy(&self) -> PathPolicy {
        self.policy
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn content(&self) -> &ContentStore {
        &self.content
    }

    /// Normalize a proxy-supplied path into its metadata key.
    pub fn key(&self, raw: &str) -> Result<String> {
        self.policy.key(raw)
    }

    pub fn read_txn(&self) -> Result<RoTxn<'_>> {
        Ok(self.env.read_txn()?)
    }

    pub fn write_txn(&self) -> Result<RwTxn<'_>> {
        Ok(self.env.write_txn()?)
    }

    /// Sync/flush LMDB to disk
    pub fn sync(&self) -> Result<()> {
        self.env.force_sync()?;
        Ok(())
    }

    /// LMDB map size in bytes; no single write can commit more than this.
    pub fn map_size(&self) -> usize {
        self.map_size
    }

    /// Entry and chunk totals without scanning either database.
    pub fn usage(&self) -> Result<StoreUsage> {
        let rtxn = self.read_txn()?;
        Ok(StoreUsage {
            entries: self.metadata.count(&rtxn)?,
            chunk_count: self.content.chunk_count(&rtxn)?,
            stored_bytes: self.content.stored_bytes(&rtxn)?,
        })
    }

    /// Gather statistics from a single read snapshot.
    pub fn stats(&self) -> Result<StoreStats> {
        let rtxn = self.read_txn()?;
        let mut stats = StoreStats::default();

        for (_, entry) in self.metadata.all(&rtxn)? {
            if entry.is_dir() {
                stats.dir_count += 1;
            } else {
                stats.file_count += 1;
                stats.logical_bytes += entry.size;
            }
        }
        for (_, len) in self.content.list(&rtxn)? {
            stats.chunk_count += 1;
            stats.stored_bytes += len;
        }
        Ok(stats)
    }
}
