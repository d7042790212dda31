use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use datafs_config::{log_cli_info, Config};
use datafs_core::DataStore;
use datafs_proxy::DataFuse;

#[derive(Args, Debug)]
pub struct MountArgs {
    /// Mount point directory (defaults to mount.mountpoint)
    #[arg(value_name = "MOUNTPOINT")]
    mountpoint: Option<PathBuf>,

    /// Mount read-only
    #[arg(long)]
    read_only: bool,
}

/// Execute the mount command
pub fn run(args: MountArgs, config: &Config) -> Result<()> {
    let Some(mountpoint) = args.mountpoint.or_else(|| config.mount.mountpoint.clone()) else {
        anyhow::bail!("No mountpoint given and mount.mountpoint is not set");
    };

    let mut config = config.clone();
    config.mount.read_only |= args.read_only;

    if !mountpoint.exists() {
        fs::create_dir_all(&mountpoint)
            .with_context(|| format!("Failed to create mountpoint: {}", mountpoint.display()))?;
    }

    let db_path = config.db_path();
    let store = DataStore::open_with_config(&config)
        .with_context(|| format!("Failed to open store: {}", db_path.display()))?;

    log_cli_info!(
        "Mounting store",
        read_only = config.mount.read_only,
        case_sensitive = store.settings().case_sensitive
    );
    tracing::info!("  Store:      {}", db_path.display());
    tracing::info!("  Mountpoint: {}", mountpoint.display());

    // Blocks until unmounted
    DataFuse::new(store, &config).mount(&mountpoint)
}
