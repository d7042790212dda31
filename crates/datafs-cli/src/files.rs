//! Single-entry file commands: ls, stat, cat, put, mkdir, rm, mv, truncate.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use datafs_config::log_cli_info;
use datafs_core::{path, DataStore, Disposition, Entry, EntryKind};

use crate::gc::format_bytes;

const NANOS_PER_SEC: u64 = 1_000_000_000;

fn kind_char(entry: &Entry) -> char {
    if entry.is_dir() {
        'd'
    } else {
        '-'
    }
}

pub fn ls<W: Write>(store: &DataStore, target: &str, long: bool, out: &mut W) -> Result<()> {
    let entry = store
        .stat(target)
        .with_context(|| format!("Cannot access {target}"))?;

    let rows: Vec<(String, Entry)> = if entry.is_dir() {
        store
            .list_children(target)?
            .into_iter()
            .map(|child| (child.name().to_string(), child.entry))
            .collect()
    } else {
        vec![(entry.name.clone(), entry)]
    };

    for (name, entry) in rows {
        if long {
            writeln!(
                out,
                "{} {:>12} {:>12} {}{}",
                kind_char(&entry),
                entry.size,
                entry.modified_at / NANOS_PER_SEC,
                name,
                if entry.is_dir() { "/" } else { "" }
            )?;
        } else if entry.is_dir() {
            writeln!(out, "{name}/")?;
        } else {
            writeln!(out, "{name}")?;
        }
    }
    Ok(())
}

pub fn stat<W: Write>(store: &DataStore, target: &str, out: &mut W) -> Result<()> {
    let key = store.key(target)?;
    let entry = store
        .stat(&key)
        .with_context(|| format!("Cannot stat {target}"))?;

    writeln!(out, "  Path:       {key}")?;
    writeln!(
        out,
        "  Name:       {}",
        if entry.name.is_empty() { "/" } else { &entry.name }
    )?;
    writeln!(
        out,
        "  Kind:       {}",
        if entry.is_dir() { "directory" } else { "file" }
    )?;
    writeln!(out, "  Size:       {} ({})", entry.size, format_bytes(entry.size))?;
    writeln!(out, "  Chunks:     {}", entry.chunk_refs.len())?;
    writeln!(out, "  Attributes: {:#06x}", entry.attributes)?;
    writeln!(out, "  Created:    {}", entry.created_at)?;
    writeln!(out, "  Modified:   {}", entry.modified_at)?;
    writeln!(out, "  Accessed:   {}", entry.accessed_at)?;
    Ok(())
}

pub fn cat<W: Write>(store: &DataStore, target: &str, out: &mut W) -> Result<()> {
    let entry = store
        .stat(target)
        .with_context(|| format!("Cannot read {target}"))?;
    if entry.is_dir() {
        anyhow::bail!("{target} is a directory");
    }

    let step = store.chunk_size();
    let mut offset = 0;
    while offset < entry.size {
        let data = store.read(target, offset, step)?;
        if data.is_empty() {
            break;
        }
        out.write_all(&data)?;
        offset += data.len() as u64;
    }
    out.flush()?;
    Ok(())
}

/// Stream `reader` into the file at `target`, replacing its content.
///
/// Returns the number of bytes stored.
pub fn copy_in<R: Read>(store: &DataStore, target: &str, reader: &mut R) -> Result<u64> {
    store
        .create(
            target,
            Disposition::OpenAndOverwriteOrCreate,
            EntryKind::File,
            0,
        )
        .with_context(|| format!("Cannot create {target}"))?;

    let mut buf = vec![0u8; store.chunk_size() as usize];
    let mut offset = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        store.write(target, offset, &buf[..n])?;
        offset += n as u64;
    }
    Ok(offset)
}

pub fn put(store: &DataStore, local: &Path, target: &str) -> Result<u64> {
    let mut file =
        File::open(local).with_context(|| format!("Failed to open {}", local.display()))?;
    let written = copy_in(store, target, &mut file)?;
    log_cli_info!("Stored file", path = target, bytes = written);
    Ok(written)
}

pub fn mkdir(store: &DataStore, target: &str, parents: bool) -> Result<()> {
    if !parents {
        store
            .create(target, Disposition::CreateNew, EntryKind::Directory, 0)
            .with_context(|| format!("Cannot create directory {target}"))?;
        return Ok(());
    }

    let normalized = path::normalize(target)?;
    let mut current = path::ROOT.to_string();
    for component in normalized.split('/').filter(|c| !c.is_empty()) {
        current = path::join(&current, component);
        store
            .create(&current, Disposition::OpenOrCreate, EntryKind::Directory, 0)
            .with_context(|| format!("Cannot create directory {current}"))?;
    }
    Ok(())
}

pub fn rm(store: &DataStore, target: &str) -> Result<()> {
    store
        .delete(target)
        .with_context(|| format!("Cannot remove {target}"))?;
    log_cli_info!("Removed entry", path = target);
    Ok(())
}

pub fn mv(store: &DataStore, src: &str, dst: &str, replace: bool) -> Result<()> {
    store
        .rename(src, dst, replace)
        .with_context(|| format!("Cannot move {src} to {dst}"))?;
    log_cli_info!("Moved entry", from = src, to = dst);
    Ok(())
}

pub fn truncate(store: &DataStore, target: &str, size: u64) -> Result<()> {
    store
        .truncate(target, size)
        .with_context(|| format!("Cannot truncate {target}"))?;
    Ok(())
}
