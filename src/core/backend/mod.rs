//! Host backend surface
//!
//! The adapter never persists bytes itself. Two traits describe what the
//! surrounding runtime supplies:
//!
//! - [`Backend`]: per-file byte I/O plus namespace operations (delete, access,
//!   full pathname). Serviced on the dedicated I/O thread, so implementations
//!   only ever see one call at a time.
//! - [`HostEnv`]: randomness, the blocking sleep primitive and the wall clock.
//!   Called directly on the engine's thread.
//!
//! Host failures are reported as [`std::io::Error`]; the adapter translates
//! them into engine status codes.

mod disk;
mod memory;

#[cfg(feature = "async")]
mod async_host;

pub use disk::DiskBackend;
pub use memory::{MemoryBackend, MemoryStore};

#[cfg(feature = "async")]
pub use async_host::{AsyncBackend, AsyncHost};

use crate::core::flags::{AccessMode, OpenFlags, SyncFlags};
use rand::rngs::OsRng;
use rand::RngCore;
use std::io;
use std::time::Duration;

/// Opaque backend resource for one open file
pub type HostHandle = u64;

/// Maximum pathname length reported when the backend has no opinion
pub const DEFAULT_MAX_PATHNAME: usize = 1024;

/// Byte-level storage supplied by the host
pub trait Backend: Send + 'static {
    /// Open or create `path`; `mode` holds permission bits for new files
    fn open(&mut self, path: &str, flags: OpenFlags, mode: u32) -> io::Result<HostHandle>;

    /// Read at `offset`, returning the bytes actually read (short at end of file)
    fn read(&mut self, handle: HostHandle, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Write at `offset`, returning the bytes actually written
    fn write(&mut self, handle: HostHandle, offset: u64, data: &[u8]) -> io::Result<usize>;

    fn truncate(&mut self, handle: HostHandle, size: u64) -> io::Result<()>;

    fn sync(&mut self, handle: HostHandle, flags: SyncFlags) -> io::Result<()>;

    fn file_size(&mut self, handle: HostHandle) -> io::Result<u64>;

    fn close(&mut self, handle: HostHandle) -> io::Result<()>;

    /// Remove `path`; `sync_dir` asks for the directory entry to be made durable
    fn delete(&mut self, path: &str, sync_dir: bool) -> io::Result<()>;

    fn access(&mut self, path: &str, mode: AccessMode) -> io::Result<bool>;

    /// Canonical absolute form of `path`
    fn full_pathname(&mut self, path: &str) -> io::Result<String>;

    /// Longest pathname the backend accepts
    fn max_path_length(&self) -> usize {
        DEFAULT_MAX_PATHNAME
    }
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn open(&mut self, path: &str, flags: OpenFlags, mode: u32) -> io::Result<HostHandle> {
        (**self).open(path, flags, mode)
    }

    fn read(&mut self, handle: HostHandle, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(handle, offset, buf)
    }

    fn write(&mut self, handle: HostHandle, offset: u64, data: &[u8]) -> io::Result<usize> {
        (**self).write(handle, offset, data)
    }

    fn truncate(&mut self, handle: HostHandle, size: u64) -> io::Result<()> {
        (**self).truncate(handle, size)
    }

    fn sync(&mut self, handle: HostHandle, flags: SyncFlags) -> io::Result<()> {
        (**self).sync(handle, flags)
    }

    fn file_size(&mut self, handle: HostHandle) -> io::Result<u64> {
        (**self).file_size(handle)
    }

    fn close(&mut self, handle: HostHandle) -> io::Result<()> {
        (**self).close(handle)
    }

    fn delete(&mut self, path: &str, sync_dir: bool) -> io::Result<()> {
        (**self).delete(path, sync_dir)
    }

    fn access(&mut self, path: &str, mode: AccessMode) -> io::Result<bool> {
        (**self).access(path, mode)
    }

    fn full_pathname(&mut self, path: &str) -> io::Result<String> {
        (**self).full_pathname(path)
    }

    fn max_path_length(&self) -> usize {
        (**self).max_path_length()
    }
}

/// Randomness, sleeping and the wall clock
pub trait HostEnv: Send + Sync + 'static {
    /// Fill `buf` with cryptographic-quality random bytes
    fn random_bytes(&self, buf: &mut [u8]);

    /// Block the calling thread for at least `ms` milliseconds
    fn blocking_sleep(&self, ms: u64);

    /// Milliseconds since the Unix epoch
    fn now_millis(&self) -> i64;
}

/// Host environment backed by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl HostEnv for SystemEnv {
    fn random_bytes(&self, buf: &mut [u8]) {
        OsRng.fill_bytes(buf);
    }

    fn blocking_sleep(&self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }

    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_system_env_sleep_blocks() {
        let start = Instant::now();
        SystemEnv.blocking_sleep(20);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_system_env_random_bytes_vary() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        SystemEnv.random_bytes(&mut a);
        SystemEnv.random_bytes(&mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_system_env_clock_is_unix_millis() {
        let now = SystemEnv.now_millis();
        // 2020-01-01T00:00:00Z
        assert!(now > 1_577_836_800_000);
    }
}
