//! `FsError` → POSIX errno, as returned to the kernel by the FUSE proxy.

use datafs_core::FsError;
use libc::c_int;

/// Errno for a store error.
pub fn errno(err: &FsError) -> c_int {
    match err {
        FsError::NotFound(_) => libc::ENOENT,
        FsError::Exists(_) => libc::EEXIST,
        FsError::NotDirectory(_) => libc::ENOTDIR,
        FsError::IsDirectory(_) => libc::EISDIR,
        FsError::DirectoryNotEmpty(_) => libc::ENOTEMPTY,
        FsError::InvalidPath(_) => libc::EINVAL,
        FsError::Unsupported(_) => libc::ENOSYS,
        e if e.is_storage_full() => libc::ENOSPC,
        FsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        FsError::Corrupt(_) | FsError::Heed(_) => libc::EIO,
    }
}
