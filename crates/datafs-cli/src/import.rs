use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use datafs_config::log_cli_info;
use datafs_core::{path, DataStore, Disposition, EntryKind};
use walkdir::WalkDir;

use crate::files::copy_in;
use crate::gc::{format_bytes, format_number};

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Host directory to copy from
    #[arg(value_name = "DIR")]
    directory: PathBuf,

    /// Store directory to copy into (created if missing)
    #[arg(default_value = "/")]
    target: String,

    /// Follow symbolic links
    #[arg(short = 'L', long)]
    follow_links: bool,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub files: u64,
    pub dirs: u64,
    pub bytes: u64,
    pub skipped: u64,
}

pub fn run(store: &DataStore, args: ImportArgs) -> Result<()> {
    let summary = import_tree(store, &args)?;

    println!();
    println!("  Imported {} into {}", args.directory.display(), args.target);
    println!("    Files:       {}", format_number(summary.files));
    println!("    Directories: {}", format_number(summary.dirs));
    println!("    Bytes:       {}", format_bytes(summary.bytes));
    if summary.skipped > 0 {
        println!("    Skipped:     {} (not a regular file)", format_number(summary.skipped));
    }
    Ok(())
}

pub fn import_tree(store: &DataStore, args: &ImportArgs) -> Result<ImportSummary> {
    if !args.directory.is_dir() {
        anyhow::bail!("Not a directory: {}", args.directory.display());
    }

    let base = path::normalize(&args.target)?;
    crate::files::mkdir(store, &base, true)?;

    let mut summary = ImportSummary::default();
    let walker = WalkDir::new(&args.directory)
        .follow_links(args.follow_links)
        .min_depth(1)
        .sort_by_file_name();

    for item in walker {
        let item = item.with_context(|| format!("Failed to walk {}", args.directory.display()))?;
        let relative = item
            .path()
            .strip_prefix(&args.directory)
            .with_context(|| format!("{} escaped the import root", item.path().display()))?;

        let mut target = base.clone();
        for component in relative.components() {
            target = path::join(&target, &component.as_os_str().to_string_lossy());
        }

        let file_type = item.file_type();
        if file_type.is_dir() {
            store
                .create(&target, Disposition::OpenOrCreate, EntryKind::Directory, 0)
                .with_context(|| format!("Cannot create directory {target}"))?;
            summary.dirs += 1;
        } else if file_type.is_file() {
            let mut file = File::open(item.path())
                .with_context(|| format!("Failed to open {}", item.path().display()))?;
            summary.bytes += copy_in(store, &target, &mut file)?;
            summary.files += 1;
        } else {
            tracing::debug!(path = %item.path().display(), "Skipping special file");
            summary.skipped += 1;
        }
    }

    log_cli_info!(
        "Import finished",
        files = summary.files,
        dirs = summary.dirs,
        bytes = summary.bytes
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use datafs_config::testing::TestEnvironment;

    fn args(env: &TestEnvironment, target: &str) -> ImportArgs {
        ImportArgs {
            directory: env.host_root.clone(),
            target: target.to_string(),
            follow_links: false,
        }
    }

    #[test]
    fn test_import_tree() {
        let env = TestEnvironment::new().unwrap();
        env.create_file("README.md", b"# project").unwrap();
        env.create_file("src/main.rs", b"fn main() {}").unwrap();
        env.create_file("src/util/mod.rs", b"").unwrap();
        env.create_dir("empty").unwrap();

        let store = DataStore::open_with_config(&env.config()).unwrap();
        let summary = import_tree(&store, &args(&env, "/proj")).unwrap();

        assert_eq!(summary.files, 3);
        assert_eq!(summary.dirs, 3);
        assert_eq!(summary.bytes, 21);
        assert_eq!(store.read_all("/proj/src/main.rs").unwrap(), b"fn main() {}");
        assert_eq!(store.stat("/proj/src/util/mod.rs").unwrap().size, 0);
        assert!(store.stat("/proj/empty").unwrap().is_dir());
    }

    #[test]
    fn test_reimport_overwrites() {
        let env = TestEnvironment::new().unwrap();
        let file = env.create_file("a.txt", b"first version").unwrap();
        let store = DataStore::open_with_config(&env.config()).unwrap();

        import_tree(&store, &args(&env, "/")).unwrap();
        std::fs::write(&file, b"v2").unwrap();
        import_tree(&store, &args(&env, "/")).unwrap();

        assert_eq!(store.read_all("/a.txt").unwrap(), b"v2");
    }

    #[test]
    fn test_import_rejects_missing_dir() {
        let env = TestEnvironment::new().unwrap();
        let store = DataStore::open_with_config(&env.config()).unwrap();
        let mut bad = args(&env, "/");
        bad.directory = env.host_root.join("nope");
        assert!(import_tree(&store, &bad).is_err());
    }
}
