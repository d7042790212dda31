//! FUSE proxy.
//!
//! Translates kernel requests into [`FileSystem`](datafs_core::FileSystem)
//! calls. Inode numbers are assigned lazily from store paths; attributes
//! and content always come from the store, nothing is cached here beyond
//! the kernel TTL.

#[cfg(all(feature = "fuse", target_os = "linux"))]
mod imp {
    use std::ffi::OsStr;
    use std::path::Path;
    use std::time::{Duration, SystemTime};

    use datafs_config::{log_proxy_debug, log_proxy_warn, Config};
    use datafs_core::{
        attributes, path, Disposition, Entry, EntryKind, FileSystem, FsError, SetTimes,
    };
    use fuser::{
        FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyCreate, ReplyData,
        ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request,
        TimeOrNow,
    };
    use libc::c_int;

    use crate::errno::errno;
    use crate::inode::{InodeTable, ROOT_INO};
    use crate::time::{from_system_time, to_system_time};

    const BLOCK_SIZE: u64 = 4096;
    const MAX_NAME_LEN: u32 = 255;

    pub struct DataFuse<F: FileSystem> {
        fs: F,
        inodes: InodeTable,
        ttl: Duration,
        fs_name: String,
        read_only: bool,
        capacity: u64,
        uid: u32,
        gid: u32,
    }

    fn fail(op: &'static str, err: &FsError) -> c_int {
        log_proxy_debug!("Request failed", op = op, kind = err.kind());
        errno(err)
    }

    fn time_or_now(t: TimeOrNow) -> u64 {
        match t {
            TimeOrNow::SpecificTime(t) => from_system_time(t),
            TimeOrNow::Now => datafs_core::now_nanos(),
        }
    }

    impl<F: FileSystem + 'static> DataFuse<F> {
        pub fn new(fs: F, config: &Config) -> Self {
            // SAFETY: getuid/getgid cannot fail.
            let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
            Self {
                fs,
                inodes: InodeTable::new(),
                ttl: Duration::from_secs(config.mount.ttl_secs),
                fs_name: config.mount.fs_name.clone(),
                read_only: config.mount.read_only,
                capacity: config.storage.map_size as u64,
                uid,
                gid,
            }
        }

        /// Mount at `mountpoint` and serve requests until unmounted.
        pub fn mount(self, mountpoint: &Path) -> anyhow::Result<()> {
            let mut opts = vec![
                MountOption::FSName(self.fs_name.clone()),
                MountOption::DefaultPermissions,
            ];
            if self.read_only {
                opts.push(MountOption::RO);
            } else {
                opts.push(MountOption::RW);
            }

            fuser::mount2(self, mountpoint, &opts)?;
            Ok(())
        }

        fn attr(&self, ino: u64, entry: &Entry) -> FileAttr {
            let (kind, perm, nlink) = if entry.is_dir() {
                (FileType::Directory, 0o755, 2)
            } else if entry.attributes & attributes::READ_ONLY != 0 {
                (FileType::RegularFile, 0o444, 1)
            } else {
                (FileType::RegularFile, 0o644, 1)
            };

            FileAttr {
                ino,
                size: entry.size,
                blocks: entry.size.div_ceil(BLOCK_SIZE),
                atime: to_system_time(entry.accessed_at),
                mtime: to_system_time(entry.modified_at),
                ctime: to_system_time(entry.modified_at),
                crtime: to_system_time(entry.created_at),
                kind,
                perm,
                nlink,
                uid: self.uid,
                gid: self.gid,
                rdev: 0,
                blksize: BLOCK_SIZE as u32,
                flags: 0,
            }
        }

        fn path_of(&self, ino: u64) -> Result<String, c_int> {
            self.inodes
                .path(ino)
                .map(str::to_string)
                .ok_or(libc::ENOENT)
        }

        /// Path of `name` under `parent`, with the name's case intact.
        fn child_path(&self, parent: u64, name: &OsStr) -> Result<String, c_int> {
            let parent = self.path_of(parent)?;
            let name = name.to_str().ok_or(libc::EINVAL)?;
            Ok(path::join(&parent, name))
        }

        /// Store key of `name` under `parent`.
        fn child_key(&self, parent: u64, name: &OsStr) -> Result<String, c_int> {
            let raw = self.child_path(parent, name)?;
            self.fs.resolve(&raw).map_err(|e| errno(&e))
        }

        fn writable(&self) -> Result<(), c_int> {
            if self.read_only {
                Err(libc::EROFS)
            } else {
                Ok(())
            }
        }

        /// Create `name` under `parent` and return its inode and attributes.
        fn create_child(
            &mut self,
            parent: u64,
            name: &OsStr,
            disposition: Disposition,
            kind: EntryKind,
        ) -> Result<(u64, FileAttr), c_int> {
            self.writable()?;
            let raw = self.child_path(parent, name)?;
            let opened = self
                .fs
                .create(&raw, disposition, kind, 0)
                .map_err(|e| fail("create", &e))?;
            let ino = self.inodes.assign(&opened.path);
            Ok((ino, self.attr(ino, &opened.entry)))
        }

        fn remove_child(&mut self, parent: u64, name: &OsStr, want_dir: bool) -> Result<(), c_int> {
            self.writable()?;
            let key = self.child_key(parent, name)?;
            let entry = self.fs.stat(&key).map_err(|e| fail("stat", &e))?;
            match (want_dir, entry.is_dir()) {
                (true, false) => return Err(libc::ENOTDIR),
                (false, true) => return Err(libc::EISDIR),
                _ => {}
            }
            self.fs.delete(&key).map_err(|e| fail("delete", &e))?;
            self.inodes.remove(&key);
            Ok(())
        }

        fn apply_setattr(
            &mut self,
            ino: u64,
            size: Option<u64>,
            atime: Option<TimeOrNow>,
            mtime: Option<TimeOrNow>,
            crtime: Option<SystemTime>,
        ) -> Result<FileAttr, c_int> {
            let key = self.path_of(ino)?;
            if size.is_some() || atime.is_some() || mtime.is_some() || crtime.is_some() {
                self.writable()?;
            }

            if let Some(size) = size {
                self.fs
                    .truncate(&key, size)
                    .map_err(|e| fail("truncate", &e))?;
            }

            let times = SetTimes {
                created: crtime.map(from_system_time),
                accessed: atime.map(time_or_now),
                modified: mtime.map(time_or_now),
            };
            let entry = if times == SetTimes::default() {
                self.fs.stat(&key).map_err(|e| fail("stat", &e))?
            } else {
                self.fs
                    .set_times(&key, times)
                    .map_err(|e| fail("set_times", &e))?
            };
            Ok(self.attr(ino, &entry))
        }
    }

    impl<F: FileSystem + 'static> Filesystem for DataFuse<F> {
        fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
            let key = match self.child_key(parent, name) {
                Ok(key) => key,
                Err(code) => return reply.error(code),
            };
            match self.fs.stat(&key) {
                Ok(entry) => {
                    let ino = self.inodes.assign(&key);
                    reply.entry(&self.ttl, &self.attr(ino, &entry), 0);
                }
                Err(e) => reply.error(errno(&e)),
            }
        }

        fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
            let key = match self.path_of(ino) {
                Ok(key) => key,
                Err(code) => return reply.error(code),
            };
            match self.fs.stat(&key) {
                Ok(entry) => reply.attr(&self.ttl, &self.attr(ino, &entry)),
                Err(e) => reply.error(fail("getattr", &e)),
            }
        }

        fn setattr(
            &mut self,
            _req: &Request,
            ino: u64,
            _mode: Option<u32>,
            _uid: Option<u32>,
            _gid: Option<u32>,
            size: Option<u64>,
            atime: Option<TimeOrNow>,
            mtime: Option<TimeOrNow>,
            _ctime: Option<SystemTime>,
            _fh: Option<u64>,
            crtime: Option<SystemTime>,
            _chgtime: Option<SystemTime>,
            _bkuptime: Option<SystemTime>,
            _flags: Option<u32>,
            reply: ReplyAttr,
        ) {
            match self.apply_setattr(ino, size, atime, mtime, crtime) {
                Ok(attr) => reply.attr(&self.ttl, &attr),
                Err(code) => reply.error(code),
            }
        }

        fn mkdir(
            &mut self,
            _req: &Request,
            parent: u64,
            name: &OsStr,
            _mode: u32,
            _umask: u32,
            reply: ReplyEntry,
        ) {
            match self.create_child(parent, name, Disposition::CreateNew, EntryKind::Directory) {
                Ok((_, attr)) => reply.entry(&self.ttl, &attr, 0),
                Err(code) => reply.error(code),
            }
        }

        fn mknod(
            &mut self,
            _req: &Request,
            parent: u64,
            name: &OsStr,
            mode: u32,
            _umask: u32,
            _rdev: u32,
            reply: ReplyEntry,
        ) {
            if mode & libc::S_IFMT != libc::S_IFREG {
                return reply.error(libc::ENOSYS);
            }
            match self.create_child(parent, name, Disposition::CreateNew, EntryKind::File) {
                Ok((_, attr)) => reply.entry(&self.ttl, &attr, 0),
                Err(code) => reply.error(code),
            }
        }

        fn create(
            &mut self,
            _req: &Request,
            parent: u64,
            name: &OsStr,
            _mode: u32,
            _umask: u32,
            flags: i32,
            reply: ReplyCreate,
        ) {
            let disposition = if flags & libc::O_EXCL != 0 {
                Disposition::CreateNew
            } else if flags & libc::O_TRUNC != 0 {
                Disposition::OpenAndOverwriteOrCreate
            } else {
                Disposition::OpenOrCreate
            };
            match self.create_child(parent, name, disposition, EntryKind::File) {
                Ok((_, attr)) => reply.created(&self.ttl, &attr, 0, 0, flags as u32),
                Err(code) => reply.error(code),
            }
        }

        fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
            let key = match self.path_of(ino) {
                Ok(key) => key,
                Err(code) => return reply.error(code),
            };
            let writes = flags & libc::O_ACCMODE != libc::O_RDONLY;
            if writes && self.read_only {
                return reply.error(libc::EROFS);
            }

            let disposition = if writes && flags & libc::O_TRUNC != 0 {
                Disposition::OpenAndOverwrite
            } else {
                Disposition::OpenExisting
            };
            match self.fs.create(&key, disposition, EntryKind::File, 0) {
                Ok(_) => reply.opened(0, 0),
                Err(e) => reply.error(fail("open", &e)),
            }
        }

        fn read(
            &mut self,
            _req: &Request,
            ino: u64,
            _fh: u64,
            offset: i64,
            size: u32,
            _flags: i32,
            _lock_owner: Option<u64>,
            reply: ReplyData,
        ) {
            let key = match self.path_of(ino) {
                Ok(key) => key,
                Err(code) => return reply.error(code),
            };
            if offset < 0 {
                return reply.error(libc::EINVAL);
            }
            match self.fs.read(&key, offset as u64, size as u64) {
                Ok(data) => reply.data(&data),
                Err(e) => {
                    log_proxy_warn!("Read failed", path = key.as_str(), kind = e.kind());
                    reply.error(errno(&e))
                }
            }
        }

        fn write(
            &mut self,
            _req: &Request,
            ino: u64,
            _fh: u64,
            offset: i64,
            data: &[u8],
            _write_flags: u32,
            _flags: i32,
            _lock_owner: Option<u64>,
            reply: ReplyWrite,
        ) {
            if let Err(code) = self.writable() {
                return reply.error(code);
            }
            let key = match self.path_of(ino) {
                Ok(key) => key,
                Err(code) => return reply.error(code),
            };
            if offset < 0 {
                return reply.error(libc::EINVAL);
            }
            match self.fs.write(&key, offset as u64, data) {
                Ok(written) => reply.written(written as u32),
                Err(e) => {
                    log_proxy_warn!("Write failed", path = key.as_str(), kind = e.kind());
                    reply.error(errno(&e))
                }
            }
        }

        fn readdir(
            &mut self,
            _req: &Request,
            ino: u64,
            _fh: u64,
            offset: i64,
            mut reply: ReplyDirectory,
        ) {
            let key = match self.path_of(ino) {
                Ok(key) => key,
                Err(code) => return reply.error(code),
            };
            let children = match self.fs.list(&key) {
                Ok(children) => children,
                Err(e) => return reply.error(fail("readdir", &e)),
            };

            let parent_ino = path::parent(&key)
                .map(|p| self.inodes.assign(p))
                .unwrap_or(ROOT_INO);

            let mut rows = vec![
                (ino, FileType::Directory, ".".to_string()),
                (parent_ino, FileType::Directory, "..".to_string()),
            ];
            for child in children {
                let kind = if child.entry.is_dir() {
                    FileType::Directory
                } else {
                    FileType::RegularFile
                };
                let child_ino = self.inodes.assign(&child.path);
                rows.push((child_ino, kind, child.entry.name));
            }

            // The offset handed back for a row is the index of the next one.
            for (i, (row_ino, kind, name)) in rows.into_iter().enumerate().skip(offset as usize) {
                if reply.add(row_ino, (i + 1) as i64, kind, name) {
                    break;
                }
            }
            reply.ok();
        }

        fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
            match self.remove_child(parent, name, false) {
                Ok(()) => reply.ok(),
                Err(code) => reply.error(code),
            }
        }

        fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
            match self.remove_child(parent, name, true) {
                Ok(()) => reply.ok(),
                Err(code) => reply.error(code),
            }
        }

        fn rename(
            &mut self,
            _req: &Request,
            parent: u64,
            name: &OsStr,
            newparent: u64,
            newname: &OsStr,
            flags: u32,
            reply: ReplyEmpty,
        ) {
            if let Err(code) = self.writable() {
                return reply.error(code);
            }
            if flags & libc::RENAME_EXCHANGE as u32 != 0 {
                return reply.error(libc::EINVAL);
            }
            let (from, to) = match (
                self.child_path(parent, name),
                self.child_path(newparent, newname),
            ) {
                (Ok(from), Ok(to)) => (from, to),
                (Err(code), _) | (_, Err(code)) => return reply.error(code),
            };

            let replace = flags & libc::RENAME_NOREPLACE as u32 == 0;
            if let Err(e) = self.fs.rename(&from, &to, replace) {
                return reply.error(fail("rename", &e));
            }
            match (self.fs.resolve(&from), self.fs.resolve(&to)) {
                (Ok(from_key), Ok(to_key)) => self.inodes.rename(&from_key, &to_key),
                (Err(e), _) | (_, Err(e)) => return reply.error(errno(&e)),
            }
            reply.ok()
        }

        fn flush(
            &mut self,
            _req: &Request,
            _ino: u64,
            _fh: u64,
            _lock_owner: u64,
            reply: ReplyEmpty,
        ) {
            // Writes commit before they are acknowledged.
            reply.ok();
        }

        fn fsync(
            &mut self,
            _req: &Request,
            _ino: u64,
            _fh: u64,
            _datasync: bool,
            reply: ReplyEmpty,
        ) {
            match self.fs.flush() {
                Ok(()) => reply.ok(),
                Err(e) => reply.error(fail("fsync", &e)),
            }
        }

        fn release(
            &mut self,
            _req: &Request,
            _ino: u64,
            _fh: u64,
            _flags: i32,
            _lock_owner: Option<u64>,
            _flush: bool,
            reply: ReplyEmpty,
        ) {
            reply.ok();
        }

        fn statfs(&mut self, _req: &Request, _ino: u64, reply: ReplyStatfs) {
            let usage = match self.fs.usage() {
                Ok(usage) => usage,
                Err(e) => return reply.error(fail("statfs", &e)),
            };
            let blocks = self.capacity / BLOCK_SIZE;
            let used = usage.stored_bytes.div_ceil(BLOCK_SIZE);
            let free = blocks.saturating_sub(used);
            let files = usage.entries;
            reply.statfs(
                blocks,
                free,
                free,
                files,
                u64::MAX - files,
                BLOCK_SIZE as u32,
                MAX_NAME_LEN,
                BLOCK_SIZE as u32,
            );
        }
    }
}

#[cfg(not(all(feature = "fuse", target_os = "linux")))]
mod imp {
    use std::marker::PhantomData;

    use datafs_config::{log_proxy_warn, Config};
    use datafs_core::FileSystem;

    /// Placeholder for builds without FUSE support
    pub struct DataFuse<F: FileSystem> {
        _fs: PhantomData<F>,
    }

    impl<F: FileSystem + 'static> DataFuse<F> {
        pub fn new(_fs: F, _config: &Config) -> Self {
            #[cfg(not(target_os = "linux"))]
            log_proxy_warn!(
                "FUSE support is only available on Linux",
                os = std::env::consts::OS
            );
            #[cfg(all(target_os = "linux", not(feature = "fuse")))]
            log_proxy_warn!("FUSE proxy is disabled; rebuild with --features fuse");
            Self { _fs: PhantomData }
        }

        pub fn mount(self, _mountpoint: &std::path::Path) -> anyhow::Result<()> {
            anyhow::bail!("FUSE not supported on this platform");
        }
    }
}

pub use imp::DataFuse;
