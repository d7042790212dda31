//! Maintenance commands: gc, fsck, stats.

use anyhow::{Context, Result};
use clap::Args;
use datafs_core::DataStore;

#[derive(Args, Debug)]
pub struct GcArgs {
    /// Actually delete orphaned chunks (default is a dry run)
    #[arg(long)]
    delete: bool,
}

pub fn run(store: &DataStore, args: GcArgs) -> Result<()> {
    println!();
    println!("  datafs Garbage Collection");
    println!("  =========================");

    let report = store
        .collect_garbage(!args.delete)
        .context("Garbage collection failed")?;

    println!();
    println!("  Chunk Statistics:");
    println!("    Total chunks:  {}", format_number(report.total_chunks));
    println!("    Referenced:    {}", format_number(report.referenced));
    println!(
        "    Orphaned:      {} ({})",
        format_number(report.orphaned),
        format_bytes(report.orphaned_bytes)
    );

    println!();
    if report.orphaned == 0 {
        println!("  No orphaned chunks.");
    } else if args.delete {
        println!(
            "  Deleted {} chunks, freed {}",
            format_number(report.deleted),
            format_bytes(report.orphaned_bytes)
        );
    } else {
        println!("  Dry run. Re-run with --delete to remove orphaned chunks.");
    }
    Ok(())
}

pub fn fsck(store: &DataStore) -> Result<()> {
    let report = store.check().context("Integrity check failed to run")?;

    println!();
    println!(
        "  Checked {} entries, {} chunk references",
        format_number(report.entries_checked),
        format_number(report.chunks_checked)
    );

    if report.is_clean() {
        println!("  No issues found.");
        return Ok(());
    }

    println!();
    for issue in &report.issues {
        println!("    {issue}");
    }
    anyhow::bail!("{} issue(s) found", report.issues.len())
}

pub fn stats(store: &DataStore) -> Result<()> {
    let stats = store.stats().context("Failed to read store statistics")?;
    let settings = store.settings();

    println!();
    println!("  Store:         {}", store.path().display());
    println!("  Chunk size:    {}", format_bytes(settings.chunk_size));
    println!("  Files:         {}", format_number(stats.file_count));
    println!("  Directories:   {}", format_number(stats.dir_count));
    println!("  Logical size:  {}", format_bytes(stats.logical_bytes));
    println!(
        "  Stored chunks: {} ({})",
        format_number(stats.chunk_count),
        format_bytes(stats.stored_bytes)
    );
    println!("  Dedup ratio:   {:.2}x", stats.dedup_ratio());
    Ok(())
}

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Format number with comma separators
pub fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    grouped
}
