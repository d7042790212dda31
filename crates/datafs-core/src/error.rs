use thiserror::Error;

/// Errors returned by store operations.
///
/// Every variant is a terminal, per-request failure. Translating them into
/// errno values or NTSTATUS codes is the proxy's job.
#[derive(Error, Debug)]
pub enum FsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("file or directory already exists: {0}")]
    Exists(String),

    #[error("not a directory: {0}")]
    NotDirectory(String),

    #[error("is a directory: {0}")]
    IsDirectory(String),

    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("store corrupted: {0}")]
    Corrupt(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("LMDB error: {0}")]
    Heed(#[from] heed::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FsError {
    /// Short, stable name of the error kind, used in logs and by the CLI.
    pub fn kind(&self) -> &'static str {
        match self {
            FsError::NotFound(_) => "NotFound",
            FsError::Exists(_) => "Exists",
            FsError::NotDirectory(_) => "NotDirectory",
            FsError::IsDirectory(_) => "IsDirectory",
            FsError::DirectoryNotEmpty(_) => "DirectoryNotEmpty",
            FsError::Corrupt(_) => "Corrupt",
            FsError::Unsupported(_) => "Unsupported",
            FsError::InvalidPath(_) => "InvalidPath",
            FsError::Heed(_) => "Storage",
            FsError::Io(_) => "Io",
        }
    }

    /// The error LMDB reports when the map cannot hold a write.
    pub fn storage_full() -> Self {
        FsError::Heed(heed::Error::Mdb(heed::MdbError::MapFull))
    }

    /// The LMDB map is full; the write did not fit.
    pub fn is_storage_full(&self) -> bool {
        matches!(
            self,
            FsError::Heed(heed::Error::Mdb(heed::MdbError::MapFull))
        )
    }
}

pub type Result<T> = std::result::Result<T, FsError>;
