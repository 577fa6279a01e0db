//! SQLite VFS (Virtual File System) over a host backend
//!
//! This module ties the pieces together into something the engine can open
//! databases through:
//!
//! - [`Vfs`] owns the host backend (on its I/O thread), the arbiter and the
//!   host environment
//! - [`VfsFile`] is one open file, forwarding I/O and locks
//! - [`register_vfs`] exposes a [`Vfs`] to SQLite under its name

mod file;
mod registry;
mod sqlite;
mod sqlite_io;


pub use file::{FileMethods, ReadOutcome, VfsFile};
pub use registry::{Vfs, VfsBuilder, VfsDescriptor, DL_ERROR_MESSAGE};
pub use sqlite::{is_registered, register_vfs, unregister_vfs};
