//! File and directory metadata records.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::hash::ContentHash;

/// Attribute bits passed through from the proxy layer.
///
/// The values follow the Windows `FILE_ATTRIBUTE_*` constants because that
/// is what Dokan hands us; the store never interprets them.
pub mod attributes {
    pub const READ_ONLY: u32 = 0x0001;
    pub const HIDDEN: u32 = 0x0002;
    pub const SYSTEM: u32 = 0x0004;
    pub const DIRECTORY: u32 = 0x0010;
    pub const ARCHIVE: u32 = 0x0020;
    pub const NORMAL: u32 = 0x0080;
}

/// Entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    #[default]
    File,
    Directory,
}

/// Metadata record for one path.
///
/// Stored as JSON in the `metadata` database. Every field other than `kind`
/// is defaulted on decode so records written by older builds keep loading
/// when fields are added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub kind: EntryKind,
    /// Case-preserved final path segment
    #[serde(default)]
    pub name: String,
    /// Content length in bytes; always 0 for directories
    #[serde(default)]
    pub size: u64,
    /// Nanoseconds since the Unix epoch
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub modified_at: u64,
    #[serde(default)]
    pub accessed_at: u64,
    #[serde(default)]
    pub attributes: u32,
    /// Content hashes covering `[0, size)` in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunk_refs: Vec<ContentHash>,
}

impl Entry {
    pub fn new(kind: EntryKind, name: &str, attributes: u32, now: u64) -> Self {
        Self {
            kind,
            name: name.to_string(),
            size: 0,
            created_at: now,
            modified_at: now,
            accessed_at: now,
            attributes,
            chunk_refs: Vec::new(),
        }
    }

    /// Create an empty file entry
    pub fn new_file(name: &str, attributes: u32, now: u64) -> Self {
        Self::new(EntryKind::File, name, attributes, now)
    }

    /// Create a directory entry
    pub fn new_directory(name: &str, attributes: u32, now: u64) -> Self {
        Self::new(EntryKind::Directory, name, attributes, now)
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    /// Record a content change. Never moves the timestamp backwards.
    pub fn touch_modified(&mut self, now: u64) {
        self.modified_at = self.modified_at.max(now);
        self.accessed_at = self.accessed_at.max(now);
    }

    /// Drop all content, keeping identity and attributes.
    pub fn clear_content(&mut self) {
        self.size = 0;
        self.chunk_refs.clear();
    }

    /// Apply explicit timestamp changes from a set-time request.
    pub fn apply_times(&mut self, times: &SetTimes) {
        if let Some(t) = times.created {
            self.created_at = t;
        }
        if let Some(t) = times.accessed {
            self.accessed_at = t;
        }
        if let Some(t) = times.modified {
            self.modified_at = t;
        }
    }
}

/// Explicit timestamp update; `None` leaves a field untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetTimes {
    pub created: Option<u64>,
    pub accessed: Option<u64>,
    pub modified: Option<u64>,
}

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Normalized key of the child
    pub path: String,
    pub entry: Entry,
}

impl DirEntry {
    pub fn name(&self) -> &str {
        &self.entry.name
    }
}

/// Current wall-clock time in nanoseconds since the Unix epoch.
pub fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
