//! # datafs CLI
//!
//! Command-line interface for the datafs path-addressed file store.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use datafs_config::logging::{init_logging, LogLevel};
use datafs_config::{log_cli_info, Config};
use datafs_core::DataStore;

mod files;
pub mod gc;
mod import;
mod mount;

/// datafs - path-addressed file store with content-addressed chunks
#[derive(Parser)]
#[command(name = "datafs")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.datafs/config.toml merged with .datafs/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Store directory, overriding storage.db_path
    #[arg(long, global = true, value_name = "DIR", env = "DATAFS_DB")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store and write a project config file
    Init {
        /// Overwrite an existing .datafs/config.toml
        #[arg(long)]
        force: bool,
    },

    /// Mount the store via FUSE (blocks until unmounted)
    Mount(mount::MountArgs),

    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,

        /// Show kind, size and modification time
        #[arg(short, long)]
        long: bool,
    },

    /// Show metadata of an entry
    Stat { path: String },

    /// Write file content to stdout
    Cat { path: String },

    /// Copy a host file into the store, replacing existing content
    Put {
        #[arg(value_name = "LOCAL")]
        local: PathBuf,
        path: String,
    },

    /// Recursively copy a host directory into the store
    Import(import::ImportArgs),

    /// Create a directory
    Mkdir {
        path: String,

        /// Create missing parents, no error if it exists
        #[arg(short, long)]
        parents: bool,
    },

    /// Remove a file or an empty directory
    Rm { path: String },

    /// Rename or move an entry
    Mv {
        src: String,
        dst: String,

        /// Replace an existing destination
        #[arg(long)]
        replace: bool,
    },

    /// Set the size of a file
    Truncate { path: String, size: u64 },

    /// Find and optionally delete unreferenced chunks
    Gc(gc::GcArgs),

    /// Verify metadata and chunk consistency
    Fsck,

    /// Show store statistics
    Stats,
}

fn main() -> Result<()> {
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => Config::load().context("Failed to load config")?,
    };
    if let Some(db) = cli.db {
        config.storage.db_path = db;
    }

    init_logging(config.logging.level.parse().unwrap_or(LogLevel::Warn));

    match cli.command {
        Commands::Init { force } => cmd_init(&config, force),
        Commands::Mount(args) => mount::run(args, &config),
        command => {
            let store = open_store(&config)?;
            run_on_store(command, &store)
        }
    }
}

fn run_on_store(command: Commands, store: &DataStore) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    match command {
        Commands::Ls { path, long } => files::ls(store, &path, long, &mut stdout),
        Commands::Stat { path } => files::stat(store, &path, &mut stdout),
        Commands::Cat { path } => files::cat(store, &path, &mut stdout),
        Commands::Put { local, path } => {
            let written = files::put(store, &local, &path)?;
            println!("{} -> {} ({})", local.display(), path, gc::format_bytes(written));
            Ok(())
        }
        Commands::Import(args) => import::run(store, args),
        Commands::Mkdir { path, parents } => files::mkdir(store, &path, parents),
        Commands::Rm { path } => files::rm(store, &path),
        Commands::Mv { src, dst, replace } => files::mv(store, &src, &dst, replace),
        Commands::Truncate { path, size } => files::truncate(store, &path, size),
        Commands::Gc(args) => gc::run(store, args),
        Commands::Fsck => gc::fsck(store),
        Commands::Stats => gc::stats(store),
        Commands::Init { .. } | Commands::Mount(_) => {
            anyhow::bail!("init and mount manage the store themselves")
        }
    }
}

fn open_store(config: &Config) -> Result<DataStore> {
    let db_path = config.db_path();
    DataStore::open_with_config(config)
        .with_context(|| format!("Failed to open store: {}", db_path.display()))
}

fn cmd_init(config: &Config, force: bool) -> Result<()> {
    let config_path = Config::project_config_path();
    if config_path.exists() && !force {
        println!(
            "  Config exists: {} (use --force to overwrite)",
            config_path.display()
        );
    } else {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let toml = Config::default_toml().context("Failed to render default config")?;
        fs::write(&config_path, toml)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        println!("  Wrote {}", config_path.display());
    }

    let store = open_store(config)?;
    let settings = store.settings();
    log_cli_info!("Initialized store", chunk_size = settings.chunk_size);

    println!("  Store:          {}", store.path().display());
    println!("  Format version: {}", settings.format_version);
    println!(
        "  Chunk size:     {}",
        gc::format_bytes(settings.chunk_size)
    );
    println!(
        "  Paths:          {}",
        if settings.case_sensitive {
            "case-sensitive"
        } else {
            "case-insensitive"
        }
    );
    Ok(())
}
