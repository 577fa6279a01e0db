//! Error types for VFS operations
//!
//! Every failure crossing the engine boundary is a [`VfsError`], and every
//! `VfsError` maps to exactly one engine status code through
//! [`VfsError::status`].

use libsqlite3_sys as ffi;
use std::fmt;
use std::os::raw::c_int;
use thiserror::Error;

/// VFS operation result type
pub type Result<T> = std::result::Result<T, VfsError>;

/// Host operation that produced an I/O failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Read,
    Write,
    Truncate,
    Sync,
    FileSize,
    Close,
    Delete,
    Access,
    FullPathname,
    /// The servicing thread or arbiter could not be reached
    Transport,
}

impl fmt::Display for IoOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IoOp::Read => "read",
            IoOp::Write => "write",
            IoOp::Truncate => "truncate",
            IoOp::Sync => "sync",
            IoOp::FileSize => "file size",
            IoOp::Close => "close",
            IoOp::Delete => "delete",
            IoOp::Access => "access",
            IoOp::FullPathname => "full pathname",
            IoOp::Transport => "transport",
        };
        f.write_str(name)
    }
}

/// Status codes surfaced to the storage engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    IoErr,
    IoErrRead,
    IoErrShortRead,
    IoErrWrite,
    IoErrFsync,
    IoErrTruncate,
    IoErrFstat,
    IoErrClose,
    IoErrDelete,
    IoErrDeleteNoent,
    IoErrAccess,
    IoErrShmMap,
    IoErrShmLock,
    CantOpen,
    Busy,
    NotFound,
    TooBig,
    Misuse,
}

impl Status {
    /// Integer code understood by the engine
    pub fn code(self) -> c_int {
        match self {
            Status::Ok => ffi::SQLITE_OK,
            Status::IoErr => ffi::SQLITE_IOERR,
            Status::IoErrRead => ffi::SQLITE_IOERR_READ,
            Status::IoErrShortRead => ffi::SQLITE_IOERR_SHORT_READ,
            Status::IoErrWrite => ffi::SQLITE_IOERR_WRITE,
            Status::IoErrFsync => ffi::SQLITE_IOERR_FSYNC,
            Status::IoErrTruncate => ffi::SQLITE_IOERR_TRUNCATE,
            Status::IoErrFstat => ffi::SQLITE_IOERR_FSTAT,
            Status::IoErrClose => ffi::SQLITE_IOERR_CLOSE,
            Status::IoErrDelete => ffi::SQLITE_IOERR_DELETE,
            Status::IoErrDeleteNoent => ffi::SQLITE_IOERR_DELETE_NOENT,
            Status::IoErrAccess => ffi::SQLITE_IOERR_ACCESS,
            Status::IoErrShmMap => ffi::SQLITE_IOERR_SHMMAP,
            Status::IoErrShmLock => ffi::SQLITE_IOERR_SHMLOCK,
            Status::CantOpen => ffi::SQLITE_CANTOPEN,
            Status::Busy => ffi::SQLITE_BUSY,
            Status::NotFound => ffi::SQLITE_NOTFOUND,
            Status::TooBig => ffi::SQLITE_TOOBIG,
            Status::Misuse => ffi::SQLITE_MISUSE,
        }
    }

    /// Whether the caller may retry under its own backoff policy
    pub fn is_retriable(self) -> bool {
        self == Status::Busy
    }
}

/// Errors raised by VFS operations
#[derive(Error, Debug)]
pub enum VfsError {
    /// Requested lock cannot be granted right now
    #[error("database is busy")]
    Busy,

    /// Host I/O failure, tagged with the failing operation
    #[error("I/O error during {op}: {source}")]
    Io {
        op: IoOp,
        #[source]
        source: std::io::Error,
    },

    /// Backend refused to open the file
    #[error("unable to open {path}: {source}")]
    CantOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Shared-memory region could not be mapped
    #[error("shared-memory map failed: {0}")]
    ShmMap(String),

    /// Shared-memory slot lock failed fatally
    #[error("shared-memory lock failed: {0}")]
    ShmLock(String),

    /// Request not handled or not supported
    #[error("not found: {0}")]
    NotFound(String),

    /// Pathname exceeds the maximum length
    #[error("path too long: {len} bytes exceeds limit of {max}")]
    TooBig { len: usize, max: usize },

    /// Handle has already been closed
    #[error("file handle is closed")]
    Closed,

    /// Lock request skips or reverses a level
    #[error("invalid lock transition: {0}")]
    InvalidTransition(String),

    /// Engine rejected VFS registration
    #[error("VFS registration failed: {0}")]
    RegistrationFailed(c_int),

    /// Configuration could not be parsed or validated
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl VfsError {
    /// Wrap a host error with the operation that produced it
    pub fn io(op: IoOp, source: std::io::Error) -> Self {
        VfsError::Io { op, source }
    }

    /// The servicing thread or arbiter went away
    pub fn disconnected(what: &str) -> Self {
        VfsError::Io {
            op: IoOp::Transport,
            source: std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                format!("{} is not running", what),
            ),
        }
    }

    /// A job panicked on the servicing thread, which keeps running
    pub fn job_panicked(what: &str) -> Self {
        VfsError::Io {
            op: IoOp::Transport,
            source: std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("job panicked on {}", what),
            ),
        }
    }

    /// Nearest engine status for this error
    pub fn status(&self) -> Status {
        match self {
            VfsError::Busy => Status::Busy,
            VfsError::Io { op, source } => match op {
                IoOp::Read => Status::IoErrRead,
                IoOp::Write => Status::IoErrWrite,
                IoOp::Truncate => Status::IoErrTruncate,
                IoOp::Sync => Status::IoErrFsync,
                IoOp::FileSize => Status::IoErrFstat,
                IoOp::Close => Status::IoErrClose,
                IoOp::Delete if source.kind() == std::io::ErrorKind::NotFound => {
                    Status::IoErrDeleteNoent
                }
                IoOp::Delete => Status::IoErrDelete,
                IoOp::Access => Status::IoErrAccess,
                IoOp::FullPathname | IoOp::Transport => Status::IoErr,
            },
            VfsError::CantOpen { .. } => Status::CantOpen,
            VfsError::ShmMap(_) => Status::IoErrShmMap,
            VfsError::ShmLock(_) => Status::IoErrShmLock,
            VfsError::NotFound(_) => Status::NotFound,
            VfsError::TooBig { .. } => Status::TooBig,
            VfsError::Closed | VfsError::InvalidTransition(_) => Status::Misuse,
            VfsError::RegistrationFailed(_) | VfsError::Config(_) => Status::Misuse,
        }
    }

    /// Engine integer code for this error
    pub fn code(&self) -> c_int {
        self.status().code()
    }
}

impl From<toml::de::Error> for VfsError {
    fn from(err: toml::de::Error) -> Self {
        VfsError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for VfsError {
    fn from(err: validator::ValidationErrors) -> Self {
        VfsError::Config(err.to_string())
    }
}
