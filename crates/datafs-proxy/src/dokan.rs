//! Dokan-style proxy.
//!
//! A platform-independent translation layer shaped after the Dokan user-mode
//! callbacks. A thin host shim on Windows forwards each callback here; all
//! the semantics (dispositions, handles, delete-on-close, NTSTATUS codes)
//! live in this module so they can be exercised on any platform.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use datafs_config::{log_proxy_debug, log_proxy_warn, Config};
use datafs_core::{
    attributes, path, ContentHash, Disposition, Entry, EntryKind, FileSystem, FsError, SetTimes,
};

use crate::time::{from_filetime, to_filetime};

/// NTSTATUS code returned to the Dokan driver.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NtStatus(pub u32);

impl NtStatus {
    pub const SUCCESS: NtStatus = NtStatus(0x0000_0000);
    pub const INVALID_HANDLE: NtStatus = NtStatus(0xC000_0008);
    pub const ACCESS_DENIED: NtStatus = NtStatus(0xC000_0022);
    pub const OBJECT_NAME_INVALID: NtStatus = NtStatus(0xC000_0033);
    pub const OBJECT_NAME_NOT_FOUND: NtStatus = NtStatus(0xC000_0034);
    pub const OBJECT_NAME_COLLISION: NtStatus = NtStatus(0xC000_0035);
    pub const DISK_FULL: NtStatus = NtStatus(0xC000_007F);
    pub const MEDIA_WRITE_PROTECTED: NtStatus = NtStatus(0xC000_00A2);
    pub const FILE_IS_A_DIRECTORY: NtStatus = NtStatus(0xC000_00BA);
    pub const NOT_SUPPORTED: NtStatus = NtStatus(0xC000_00BB);
    pub const INTERNAL_ERROR: NtStatus = NtStatus(0xC000_00E5);
    pub const DIRECTORY_NOT_EMPTY: NtStatus = NtStatus(0xC000_0101);
    pub const FILE_CORRUPT_ERROR: NtStatus = NtStatus(0xC000_0102);
    pub const NOT_A_DIRECTORY: NtStatus = NtStatus(0xC000_0103);
    pub const CANNOT_DELETE: NtStatus = NtStatus(0xC000_0121);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::SUCCESS => "STATUS_SUCCESS",
            Self::INVALID_HANDLE => "STATUS_INVALID_HANDLE",
            Self::ACCESS_DENIED => "STATUS_ACCESS_DENIED",
            Self::OBJECT_NAME_INVALID => "STATUS_OBJECT_NAME_INVALID",
            Self::OBJECT_NAME_NOT_FOUND => "STATUS_OBJECT_NAME_NOT_FOUND",
            Self::OBJECT_NAME_COLLISION => "STATUS_OBJECT_NAME_COLLISION",
            Self::DISK_FULL => "STATUS_DISK_FULL",
            Self::MEDIA_WRITE_PROTECTED => "STATUS_MEDIA_WRITE_PROTECTED",
            Self::FILE_IS_A_DIRECTORY => "STATUS_FILE_IS_A_DIRECTORY",
            Self::NOT_SUPPORTED => "STATUS_NOT_SUPPORTED",
            Self::INTERNAL_ERROR => "STATUS_INTERNAL_ERROR",
            Self::DIRECTORY_NOT_EMPTY => "STATUS_DIRECTORY_NOT_EMPTY",
            Self::FILE_CORRUPT_ERROR => "STATUS_FILE_CORRUPT_ERROR",
            Self::NOT_A_DIRECTORY => "STATUS_NOT_A_DIRECTORY",
            Self::CANNOT_DELETE => "STATUS_CANNOT_DELETE",
            _ => return None,
        })
    }
}

impl fmt::Debug for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "NtStatus({:#010x})", self.0),
        }
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl From<&FsError> for NtStatus {
    fn from(err: &FsError) -> Self {
        match err {
            FsError::NotFound(_) => NtStatus::OBJECT_NAME_NOT_FOUND,
            FsError::Exists(_) => NtStatus::OBJECT_NAME_COLLISION,
            FsError::NotDirectory(_) => NtStatus::NOT_A_DIRECTORY,
            FsError::IsDirectory(_) => NtStatus::FILE_IS_A_DIRECTORY,
            FsError::DirectoryNotEmpty(_) => NtStatus::DIRECTORY_NOT_EMPTY,
            FsError::Corrupt(_) => NtStatus::FILE_CORRUPT_ERROR,
            FsError::Unsupported(_) => NtStatus::NOT_SUPPORTED,
            FsError::InvalidPath(_) => NtStatus::OBJECT_NAME_INVALID,
            e if e.is_storage_full() => NtStatus::DISK_FULL,
            FsError::Heed(_) | FsError::Io(_) => NtStatus::INTERNAL_ERROR,
        }
    }
}

impl From<FsError> for NtStatus {
    fn from(err: FsError) -> Self {
        NtStatus::from(&err)
    }
}

pub type DokanResult<T> = std::result::Result<T, NtStatus>;

/// `FILE_*` volume flags reported by [`DokanProxy::volume_information`].
pub mod volume_flags {
    pub const CASE_SENSITIVE_SEARCH: u32 = 0x0000_0001;
    pub const CASE_PRESERVED_NAMES: u32 = 0x0000_0002;
    pub const UNICODE_ON_DISK: u32 = 0x0000_0004;
    pub const READ_ONLY_VOLUME: u32 = 0x0008_0000;
}

/// Volume-level settings for the Dokan proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DokanOptions {
    pub volume_name: String,
    pub fs_name: String,
    pub serial_number: u32,
    pub read_only: bool,
    /// Reported volume size in bytes
    pub capacity: u64,
}

impl Default for DokanOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl DokanOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            volume_name: config.mount.volume_name.clone(),
            fs_name: config.mount.fs_name.clone(),
            serial_number: 0x0D47_AF50,
            read_only: config.mount.read_only,
            capacity: config.storage.map_size as u64,
        }
    }
}

/// Result of [`DokanProxy::create_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateResult {
    pub handle: u64,
    pub is_directory: bool,
    /// False when an existing entry was opened, replaced or overwritten
    pub created: bool,
}

/// `BY_HANDLE_FILE_INFORMATION` equivalent. Times are FILETIME ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInformation {
    pub attributes: u32,
    pub creation_time: u64,
    pub last_access_time: u64,
    pub last_write_time: u64,
    pub file_size: u64,
    pub number_of_links: u32,
    pub file_index: u64,
}

/// `WIN32_FIND_DATAW` equivalent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindData {
    pub file_name: String,
    pub attributes: u32,
    pub creation_time: u64,
    pub last_access_time: u64,
    pub last_write_time: u64,
    pub file_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInformation {
    pub volume_name: String,
    pub serial_number: u32,
    pub max_component_length: u32,
    pub file_system_flags: u32,
    pub file_system_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSpace {
    pub free_bytes_available: u64,
    pub total_bytes: u64,
    pub total_free_bytes: u64,
}

#[derive(Debug, Clone)]
struct OpenFile {
    /// Store key of the opened entry
    path: String,
    is_dir: bool,
    delete_on_close: bool,
}

/// Windows attribute bits for an entry, with the directory bit forced to
/// match its kind.
fn windows_attributes(entry: &Entry) -> u32 {
    let mut attrs = entry.attributes & !attributes::DIRECTORY;
    if entry.is_dir() {
        attrs |= attributes::DIRECTORY;
    }
    if attrs == 0 {
        attrs = attributes::NORMAL;
    }
    attrs
}

/// Stable per-path file index derived from the store key.
fn file_index(key: &str) -> u64 {
    let hash = ContentHash::compute(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

fn find_data(entry: &Entry) -> FindData {
    FindData {
        file_name: entry.name.clone(),
        attributes: windows_attributes(entry),
        creation_time: to_filetime(entry.created_at),
        last_access_time: to_filetime(entry.accessed_at),
        last_write_time: to_filetime(entry.modified_at),
        file_size: entry.size,
    }
}

/// Dokan-style front end over a [`FileSystem`].
///
/// Open handles live in a concurrent map, so callbacks may arrive from
/// several driver threads at once.
pub struct DokanProxy<F: FileSystem> {
    fs: F,
    options: DokanOptions,
    handles: DashMap<u64, OpenFile>,
    next_handle: AtomicU64,
}

impl<F: FileSystem> DokanProxy<F> {
    pub fn new(fs: F, options: DokanOptions) -> Self {
        Self {
            fs,
            options,
            handles: DashMap::new(),
            next_handle: AtomicU64::new(1),
        }
    }

    pub fn filesystem(&self) -> &F {
        &self.fs
    }

    /// Number of handles not yet closed
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    fn open_file(&self, handle: u64) -> DokanResult<OpenFile> {
        self.handles
            .get(&handle)
            .map(|h| h.value().clone())
            .ok_or(NtStatus::INVALID_HANDLE)
    }

    fn writable(&self) -> DokanResult<()> {
        if self.options.read_only {
            Err(NtStatus::MEDIA_WRITE_PROTECTED)
        } else {
            Ok(())
        }
    }

    /// Open or create `path`. `raw_disposition` is Dokan's `CreateDisposition`
    /// (`FILE_SUPERSEDE` = 0 .. `FILE_OVERWRITE_IF` = 5).
    pub fn create_file(
        &self,
        path: &str,
        raw_disposition: u32,
        is_directory: bool,
        file_attributes: u32,
    ) -> DokanResult<CreateResult> {
        let disposition = Disposition::from_raw(raw_disposition)?;
        if disposition != Disposition::OpenExisting {
            self.writable()?;
        }
        let kind = if is_directory {
            EntryKind::Directory
        } else {
            EntryKind::File
        };

        let opened = self
            .fs
            .create(path, disposition, kind, file_attributes)
            .map_err(|e| {
                log_proxy_debug!("CreateFile failed", path = path, kind = e.kind());
                NtStatus::from(&e)
            })?;

        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let is_dir = opened.entry.is_dir();
        self.handles.insert(
            handle,
            OpenFile {
                path: opened.path,
                is_dir,
                delete_on_close: false,
            },
        );

        Ok(CreateResult {
            handle,
            is_directory: is_dir,
            created: opened.created,
        })
    }

    pub fn read_file(&self, handle: u64, offset: u64, length: u32) -> DokanResult<Vec<u8>> {
        let file = self.open_file(handle)?;
        Ok(self.fs.read(&file.path, offset, length as u64)?)
    }

    /// Write at `offset`, or at end of file when `write_to_end_of_file` is
    /// set. Returns the number of bytes written.
    pub fn write_file(
        &self,
        handle: u64,
        offset: u64,
        data: &[u8],
        write_to_end_of_file: bool,
    ) -> DokanResult<u32> {
        self.writable()?;
        let file = self.open_file(handle)?;
        if write_to_end_of_file {
            self.fs.append(&file.path, data)?;
            return Ok(data.len() as u32);
        }
        let written = self.fs.write(&file.path, offset, data)?;
        Ok(written as u32)
    }

    pub fn flush_file_buffers(&self, handle: u64) -> DokanResult<()> {
        self.open_file(handle)?;
        Ok(self.fs.flush()?)
    }

    pub fn get_file_information(&self, handle: u64) -> DokanResult<FileInformation> {
        let file = self.open_file(handle)?;
        let entry = self.fs.stat(&file.path)?;
        Ok(FileInformation {
            attributes: windows_attributes(&entry),
            creation_time: to_filetime(entry.created_at),
            last_access_time: to_filetime(entry.accessed_at),
            last_write_time: to_filetime(entry.modified_at),
            file_size: entry.size,
            number_of_links: 1,
            file_index: file_index(&file.path),
        })
    }

    /// List a directory, calling `fill` once per child matching `pattern`.
    pub fn find_files<C>(&self, path: &str, pattern: &str, mut fill: C) -> DokanResult<()>
    where
        C: FnMut(&FindData),
    {
        for child in self.fs.find(path, pattern)? {
            fill(&find_data(&child.entry));
        }
        Ok(())
    }

    pub fn set_end_of_file(&self, handle: u64, length: u64) -> DokanResult<()> {
        self.writable()?;
        let file = self.open_file(handle)?;
        Ok(self.fs.truncate(&file.path, length)?)
    }

    /// Allocation only ever shrinks a file; growing it is a no-op.
    pub fn set_allocation_size(&self, handle: u64, length: u64) -> DokanResult<()> {
        self.writable()?;
        let file = self.open_file(handle)?;
        Ok(self.fs.shrink_to(&file.path, length)?)
    }

    /// FILETIME values of 0 or all ones leave that timestamp unchanged.
    pub fn set_file_time(
        &self,
        handle: u64,
        creation_time: u64,
        last_access_time: u64,
        last_write_time: u64,
    ) -> DokanResult<()> {
        self.writable()?;
        let file = self.open_file(handle)?;
        let times = SetTimes {
            created: from_filetime(creation_time),
            accessed: from_filetime(last_access_time),
            modified: from_filetime(last_write_time),
        };
        if times != SetTimes::default() {
            self.fs.set_times(&file.path, times)?;
        }
        Ok(())
    }

    /// An attribute value of 0 means "no change".
    pub fn set_file_attributes(&self, handle: u64, file_attributes: u32) -> DokanResult<()> {
        self.writable()?;
        let file = self.open_file(handle)?;
        if file_attributes != 0 {
            self.fs.set_attributes(&file.path, file_attributes)?;
        }
        Ok(())
    }

    /// Rename the entry behind `handle`. Every open handle at or below the
    /// old path follows the move.
    pub fn move_file(
        &self,
        handle: u64,
        new_path: &str,
        replace_if_existing: bool,
    ) -> DokanResult<()> {
        self.writable()?;
        let file = self.open_file(handle)?;
        let new_key = self.fs.resolve(new_path)?;

        self.fs
            .rename(&file.path, new_path, replace_if_existing)
            .map_err(|e| {
                log_proxy_debug!(
                    "MoveFile failed",
                    from = file.path.as_str(),
                    to = new_path,
                    kind = e.kind()
                );
                NtStatus::from(&e)
            })?;

        for mut open in self.handles.iter_mut() {
            let moved = open.path == file.path || path::is_descendant(&open.path, &file.path);
            if moved {
                open.path = path::rebase(&open.path, &file.path, &new_key);
            }
        }
        Ok(())
    }

    /// Check a file can be deleted and record the pending delete; the entry
    /// is removed in [`cleanup`](Self::cleanup).
    pub fn can_delete_file(&self, handle: u64, delete_pending: bool) -> DokanResult<()> {
        self.writable()?;
        let file = self.open_file(handle)?;
        if file.is_dir {
            return Err(NtStatus::ACCESS_DENIED);
        }
        let entry = self.fs.stat(&file.path)?;
        if entry.attributes & attributes::READ_ONLY != 0 {
            return Err(NtStatus::CANNOT_DELETE);
        }
        self.mark_delete(handle, delete_pending);
        Ok(())
    }

    pub fn can_delete_directory(&self, handle: u64, delete_pending: bool) -> DokanResult<()> {
        self.writable()?;
        let file = self.open_file(handle)?;
        if !file.is_dir {
            return Err(NtStatus::NOT_A_DIRECTORY);
        }
        if path::is_root(&file.path) {
            return Err(NtStatus::ACCESS_DENIED);
        }
        if !self.fs.list(&file.path)?.is_empty() {
            return Err(NtStatus::DIRECTORY_NOT_EMPTY);
        }
        self.mark_delete(handle, delete_pending);
        Ok(())
    }

    fn mark_delete(&self, handle: u64, pending: bool) {
        if let Some(mut open) = self.handles.get_mut(&handle) {
            open.delete_on_close = pending;
        }
    }

    /// Last user handle closed: carry out a pending delete.
    pub fn cleanup(&self, handle: u64) -> DokanResult<()> {
        let file = self.open_file(handle)?;
        if !file.delete_on_close {
            return Ok(());
        }
        self.mark_delete(handle, false);
        self.fs.delete(&file.path).map_err(|e| {
            log_proxy_warn!(
                "Delete on close failed",
                path = file.path.as_str(),
                kind = e.kind()
            );
            NtStatus::from(&e)
        })
    }

    pub fn close_file(&self, handle: u64) {
        self.handles.remove(&handle);
    }

    pub fn volume_information(&self) -> VolumeInformation {
        let mut flags = volume_flags::CASE_PRESERVED_NAMES | volume_flags::UNICODE_ON_DISK;
        if self.fs.case_sensitive() {
            flags |= volume_flags::CASE_SENSITIVE_SEARCH;
        }
        if self.options.read_only {
            flags |= volume_flags::READ_ONLY_VOLUME;
        }
        VolumeInformation {
            volume_name: self.options.volume_name.clone(),
            serial_number: self.options.serial_number,
            max_component_length: 255,
            file_system_flags: flags,
            file_system_name: self.options.fs_name.clone(),
        }
    }

    pub fn disk_free_space(&self) -> DokanResult<DiskSpace> {
        let usage = self.fs.usage()?;
        let free = self.options.capacity.saturating_sub(usage.stored_bytes);
        Ok(DiskSpace {
            free_bytes_available: free,
            total_bytes: self.options.capacity,
            total_free_bytes: free,
        })
    }
}
