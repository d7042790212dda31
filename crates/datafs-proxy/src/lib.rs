//! # datafs-proxy
//!
//! OS-facing front ends for a datafs store.
//!
//! - [`DataFuse`]: FUSE filesystem (Linux, `fuse` feature). Inodes are
//!   assigned lazily from store paths.
//! - [`DokanProxy`]: Dokan-style callback layer with a concurrent handle
//!   table and NTSTATUS translation.
//!
//! Both are generic over [`datafs_core::FileSystem`] and translate
//! [`datafs_core::FsError`] at the boundary: [`errno`] for FUSE,
//! [`NtStatus`] for Dokan.

pub mod dokan;
pub mod errno;
mod fuse;
pub mod inode;
pub mod time;

pub use dokan::{DokanOptions, DokanProxy, NtStatus};
pub use errno::errno;
pub use fuse::DataFuse;
