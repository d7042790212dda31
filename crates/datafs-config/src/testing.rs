//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - A private LMDB directory per test
//! - A host-side scratch directory for import/export fixtures
//! - A `Config` pointing at both
//!
//! # Usage
//!
//! ```ignore
//! use datafs_config::testing::TestEnvironment;
//!
//! #[test]
//! fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     let config = env.config();
//!     // config.storage.db_path is isolated
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::Config;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// LMDB environment directory for this test
    pub db_path: PathBuf,
    /// Host directory for fixture files
    pub host_root: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let db_path = root.join(format!("store-{}.lmdb", test_id));
        let host_root = root.join("host");
        std::fs::create_dir_all(&host_root)?;

        Ok(Self {
            _temp_dir: temp_dir,
            db_path,
            host_root,
            test_id,
        })
    }

    /// Config pointing at this environment, with a small map size so tests
    /// don't reserve a gigabyte of address space each.
    pub fn config(&self) -> Config {
        let mut cfg = Config::default();
        cfg.storage.db_path = self.db_path.clone();
        cfg.storage.map_size = 64 * 1024 * 1024;
        cfg
    }

    /// Create a host fixture file with content
    pub fn create_file(&self, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.host_root.join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Create a host fixture directory
    pub fn create_dir(&self, relative_path: &str) -> anyhow::Result<PathBuf> {
        let path = self.host_root.join(relative_path);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_creates_directories() {
        let env = TestEnvironment::new().unwrap();
        assert!(env.host_root.exists());
        // The store directory is created by whoever opens it.
        assert!(!env.db_path.exists());
    }

    #[test]
    fn test_environment_has_unique_db() {
        let env1 = TestEnvironment::new().unwrap();
        let env2 = TestEnvironment::new().unwrap();
        assert_ne!(env1.db_path, env2.db_path);
    }

    #[test]
    fn test_create_file() {
        let env = TestEnvironment::new().unwrap();
        let path = env.create_file("src/main.rs", b"fn main() {}").unwrap();
        assert!(path.exists());
        assert_eq!(std::fs::read(&path).unwrap(), b"fn main() {}");
    }

    #[test]
    fn test_config_points_at_environment() {
        let env = TestEnvironment::new().unwrap();
        let cfg = env.config();
        assert_eq!(cfg.storage.db_path, env.db_path);
    }
}
