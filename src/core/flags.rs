//! Engine-defined flag words: open flags, access modes and sync flags

use bitflags::bitflags;
use libsqlite3_sys as ffi;
use std::os::raw::c_int;

bitflags! {
    /// Open-flags bitmask as passed by the engine to `open`
    ///
    /// Bits without a named constant are kept as-is so they echo back to the
    /// engine unchanged.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: c_int {
        const READONLY = ffi::SQLITE_OPEN_READONLY;
        const READWRITE = ffi::SQLITE_OPEN_READWRITE;
        const CREATE = ffi::SQLITE_OPEN_CREATE;
        const DELETEONCLOSE = ffi::SQLITE_OPEN_DELETEONCLOSE;
        const EXCLUSIVE = ffi::SQLITE_OPEN_EXCLUSIVE;
        const URI = ffi::SQLITE_OPEN_URI;
        const MEMORY = ffi::SQLITE_OPEN_MEMORY;
        const MAIN_DB = ffi::SQLITE_OPEN_MAIN_DB;
        const TEMP_DB = ffi::SQLITE_OPEN_TEMP_DB;
        const TRANSIENT_DB = ffi::SQLITE_OPEN_TRANSIENT_DB;
        const MAIN_JOURNAL = ffi::SQLITE_OPEN_MAIN_JOURNAL;
        const TEMP_JOURNAL = ffi::SQLITE_OPEN_TEMP_JOURNAL;
        const SUBJOURNAL = ffi::SQLITE_OPEN_SUBJOURNAL;
        const SUPER_JOURNAL = ffi::SQLITE_OPEN_SUPER_JOURNAL;
        const NOMUTEX = ffi::SQLITE_OPEN_NOMUTEX;
        const FULLMUTEX = ffi::SQLITE_OPEN_FULLMUTEX;
        const SHAREDCACHE = ffi::SQLITE_OPEN_SHAREDCACHE;
        const PRIVATECACHE = ffi::SQLITE_OPEN_PRIVATECACHE;
        const WAL = ffi::SQLITE_OPEN_WAL;
    }
}

impl OpenFlags {
    pub fn is_read_only(self) -> bool {
        self.contains(Self::READONLY) && !self.contains(Self::READWRITE)
    }
}

/// Question asked by `access`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Exists,
    ReadWrite,
    Read,
}

impl AccessMode {
    pub fn from_raw(raw: c_int) -> Option<Self> {
        match raw {
            ffi::SQLITE_ACCESS_EXISTS => Some(AccessMode::Exists),
            ffi::SQLITE_ACCESS_READWRITE => Some(AccessMode::ReadWrite),
            ffi::SQLITE_ACCESS_READ => Some(AccessMode::Read),
            _ => None,
        }
    }
}

/// Durability requested by `sync`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncFlags {
    /// Only file contents need to reach stable storage, not metadata
    pub data_only: bool,
}

impl SyncFlags {
    pub fn from_raw(raw: c_int) -> Self {
        SyncFlags {
            data_only: raw & ffi::SQLITE_SYNC_DATAONLY != 0,
        }
    }
}
