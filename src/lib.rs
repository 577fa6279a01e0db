//! # hostvfs - SQLite VFS over host-supplied storage
//!
//! `hostvfs` lets the SQLite engine run against storage it cannot reach
//! directly. The host supplies byte-level file operations through the
//! [`Backend`] trait (and randomness, sleeping and the clock through
//! [`HostEnv`]); this crate turns them into a registered SQLite VFS.
//!
//! - **Synchronous engine, any host**: every engine call blocks on a
//!   dedicated servicing thread until the host operation completes
//! - **Multiple connections**: a single arbiter thread owns advisory locks
//!   and the WAL-index shared memory, so WAL mode works across connections
//! - **Async hosts**: with the `async` feature, an [`AsyncBackend`] is driven
//!   on its own runtime
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hostvfs::{register_vfs, DiskBackend, Vfs};
//! use rusqlite::{Connection, OpenFlags};
//!
//! # fn main() -> anyhow::Result<()> {
//! let vfs = Vfs::builder()
//!     .name("app")
//!     .backend(DiskBackend::new("/var/lib/app")?)
//!     .build()?;
//! register_vfs(vfs)?;
//!
//! let conn = Connection::open_with_flags(
//!     "file:app.db?vfs=app",
//!     OpenFlags::SQLITE_OPEN_READ_WRITE
//!         | OpenFlags::SQLITE_OPEN_CREATE
//!         | OpenFlags::SQLITE_OPEN_URI,
//! )?;
//! conn.execute_batch("PRAGMA journal_mode=WAL; CREATE TABLE t(x);")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! A [`VfsConfig`] can be loaded from TOML:
//!
//! ```toml
//! name = "app"
//! create_mode = 384      # 0o600
//! make_default = false
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   sqlite3_vfs / io_methods   ┌───────────┐
//! │ SQLite engine│ ───────────────────────────► │  VfsFile  │
//! └──────────────┘                              └─────┬─────┘
//!                        byte I/O (blocking call)     │    locks / SHM
//!                  ┌──────────────────────────────────┤
//!                  ▼                                  ▼
//!          ┌───────────────┐                  ┌──────────────┐
//!          │ I/O thread    │                  │ Arbiter      │
//!          │  Backend      │                  │  FileLocks   │
//!          └───────────────┘                  │  ShmFile     │
//!                                             └──────────────┘
//! ```

pub mod config;
pub mod core;
pub mod error;

pub use crate::config::VfsConfig;
pub use crate::core::backend::{
    Backend, DiskBackend, HostEnv, HostHandle, MemoryBackend, MemoryStore, SystemEnv,
};
pub use crate::core::flags::{AccessMode, OpenFlags, SyncFlags};
pub use crate::core::lock::{ConnId, LockLevel};
pub use crate::core::shm::{ShmLockMode, ShmLockRequest, ShmRegion};
pub use crate::core::vfs::{
    is_registered, register_vfs, unregister_vfs, FileMethods, ReadOutcome, Vfs, VfsBuilder,
    VfsDescriptor, VfsFile,
};
pub use crate::error::{Result, Status, VfsError};

#[cfg(feature = "async")]
pub use crate::core::backend::{AsyncBackend, AsyncHost};
