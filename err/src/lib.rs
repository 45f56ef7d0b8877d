#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("device I/O: {0}")]
    DeviceIo(#[from] std::io::Error),
    #[error("short {op} at sector {sector}")]
    ShortAccess { op: &'static str, sector: u64 },
    #[error("filesystem corrupt: {0}")]
    FilesystemCorrupt(String),
    #[error("no space left on volume")]
    NoSpace,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("not empty: {0}")]
    NotEmpty(String),
    #[error("invalid name: {0}")]
    InvalidName(String),
    #[error("not a regular file: {0}")]
    NotAFile(String),
    #[error("symlink loop resolving {0}")]
    SymlinkLoop(String),
    #[error("broken symlink: {0}")]
    BrokenSymlink(String),
    #[error("journal entry corrupt (tx {0})")]
    JournalCorrupt(u64),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("level is protected: {0}")]
    ProtectedLevel(String),
}

pub type Result<T> = core::result::Result<T, Error>;
