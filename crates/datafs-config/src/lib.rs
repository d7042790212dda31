//! # datafs-config
//!
//! Configuration management for datafs.
//!
//! Loads configuration from:
//! 1. `~/.datafs/config.toml` (global)
//! 2. `.datafs/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)
//!
//! The loaded [`Config`] is a plain value: callers pass it (or the options
//! derived from it) to whatever they construct. Nothing here is global.

pub mod logging;
pub mod testing;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default location of the LMDB environment directory.
pub const DEFAULT_DB_PATH: &str = "~/.datafs/store.lmdb";

/// Default chunk size for newly created stores (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML render error: {0}")]
    TomlRender(#[from] toml::ser::Error),
    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub chunking: ChunkingConfig,
    pub mount: MountConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // 1. Global config (~/.datafs/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                config = Self::read_file(&global_path)?;
            }
        }

        // 2. Project config (.datafs/config.toml) overrides global
        let project_path = Self::project_config_path();
        if project_path.exists() {
            debug!("Loading project config from {:?}", project_path);
            let project_config = Self::read_file(&project_path)?;
            config.merge(project_config);
        }

        // 3. Environment overrides
        config.apply_env_overrides()?;

        Ok(config)
    }

    /// Load config from an explicit file, then apply environment overrides.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::read_file(path.as_ref())?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Global config path: ~/.datafs/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".datafs/config.toml"))
    }

    /// Project config path: .datafs/config.toml
    pub fn project_config_path() -> PathBuf {
        PathBuf::from(".datafs/config.toml")
    }

    /// Merge a project config over this one.
    ///
    /// A project section only wins for the values it changed from the
    /// defaults, so a project file naming just `[mount]` keeps the global
    /// storage location.
    fn merge(&mut self, other: Config) {
        let defaults = Config::default();

        if other.storage.db_path != defaults.storage.db_path {
            self.storage.db_path = other.storage.db_path;
        }
        if other.storage.map_size != defaults.storage.map_size {
            self.storage.map_size = other.storage.map_size;
        }
        if other.storage.max_readers != defaults.storage.max_readers {
            self.storage.max_readers = other.storage.max_readers;
        }
        if other.chunking != defaults.chunking {
            self.chunking = other.chunking;
        }
        if other.mount.mountpoint.is_some() {
            self.mount.mountpoint = other.mount.mountpoint;
        }
        if other.mount.case_sensitive != defaults.mount.case_sensitive {
            self.mount.case_sensitive = other.mount.case_sensitive;
        }
        if other.mount.fs_name != defaults.mount.fs_name {
            self.mount.fs_name = other.mount.fs_name;
        }
        if other.mount.volume_name != defaults.mount.volume_name {
            self.mount.volume_name = other.mount.volume_name;
        }
        if other.mount.read_only {
            self.mount.read_only = true;
        }
        if other.mount.ttl_secs != defaults.mount.ttl_secs {
            self.mount.ttl_secs = other.mount.ttl_secs;
        }
        if other.logging != defaults.logging {
            self.logging = other.logging;
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("DATAFS_DB") {
            self.storage.db_path = PathBuf::from(path);
        }
        if let Some(size) = lookup("DATAFS_CHUNK_SIZE") {
            self.chunking.chunk_size = size.parse().map_err(|_| ConfigError::InvalidEnv {
                key: "DATAFS_CHUNK_SIZE",
                value: size.clone(),
            })?;
        }
        if let Some(flag) = lookup("DATAFS_CASE_SENSITIVE") {
            self.mount.case_sensitive = match flag.to_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        key: "DATAFS_CASE_SENSITIVE",
                        value: flag,
                    })
                }
            };
        }
        if let Some(level) = lookup("DATAFS_LOG") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// The storage directory with `~/` expanded.
    pub fn db_path(&self) -> PathBuf {
        expand_home(&self.storage.db_path.to_string_lossy())
    }

    /// Generate default config TOML string
    pub fn default_toml() -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&Config::default())?)
    }
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// LMDB environment directory
    pub db_path: PathBuf,
    /// LMDB map size in bytes
    pub map_size: usize,
    /// Maximum concurrent read transactions
    pub max_readers: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            map_size: 1024 * 1024 * 1024,
            max_readers: 126,
        }
    }
}

/// Content chunking configuration.
///
/// Only consulted when a store is created; an existing store keeps the chunk
/// size it was created with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Mount configuration shared by the FUSE and Dokan proxies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    pub mountpoint: Option<PathBuf>,
    /// Path case policy for newly created stores
    pub case_sensitive: bool,
    pub fs_name: String,
    pub volume_name: String,
    pub read_only: bool,
    /// Attribute cache TTL handed to the kernel
    pub ttl_secs: u64,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            mountpoint: None,
            case_sensitive: true,
            fs_name: "datafs".to_string(),
            volume_name: "datafs".to_string(),
            read_only: false,
            ttl_secs: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(p: &str) -> PathBuf {
    if let Some(stripped) = p.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(p)
}
