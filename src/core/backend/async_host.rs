//! Asynchronous hosts
//!
//! A host whose storage is reached through futures implements
//! [`AsyncBackend`]; [`AsyncHost`] turns it into a [`Backend`]. The I/O thread
//! blocks on each future while a tokio runtime drives it. That runtime must
//! never be the thread the engine calls from: an engine thread parked on a
//! completion signal cannot also poll the host's futures.

use super::{Backend, HostHandle, DEFAULT_MAX_PATHNAME};
use crate::core::flags::{AccessMode, OpenFlags, SyncFlags};
use std::io;
use tokio::runtime::{Builder, Handle, Runtime};

/// Storage reached through an asynchronous call surface
#[allow(async_fn_in_trait)]
pub trait AsyncBackend: Send + 'static {
    async fn open(&mut self, path: &str, flags: OpenFlags, mode: u32) -> io::Result<HostHandle>;

    async fn read(&mut self, handle: HostHandle, offset: u64, buf: &mut [u8])
        -> io::Result<usize>;

    async fn write(&mut self, handle: HostHandle, offset: u64, data: &[u8]) -> io::Result<usize>;

    async fn truncate(&mut self, handle: HostHandle, size: u64) -> io::Result<()>;

    async fn sync(&mut self, handle: HostHandle, flags: SyncFlags) -> io::Result<()>;

    async fn file_size(&mut self, handle: HostHandle) -> io::Result<u64>;

    async fn close(&mut self, handle: HostHandle) -> io::Result<()>;

    async fn delete(&mut self, path: &str, sync_dir: bool) -> io::Result<()>;

    async fn access(&mut self, path: &str, mode: AccessMode) -> io::Result<bool>;

    async fn full_pathname(&mut self, path: &str) -> io::Result<String>;

    fn max_path_length(&self) -> usize {
        DEFAULT_MAX_PATHNAME
    }
}

enum RuntimeRef {
    Owned(Runtime),
    Shared(Handle),
}

impl RuntimeRef {
    fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        match self {
            RuntimeRef::Owned(rt) => rt.block_on(future),
            RuntimeRef::Shared(handle) => handle.block_on(future),
        }
    }
}

/// [`Backend`] adapter for an [`AsyncBackend`]
pub struct AsyncHost<B> {
    inner: B,
    runtime: RuntimeRef,
}

impl<B: AsyncBackend> AsyncHost<B> {
    /// Drive `inner` on a private current-thread runtime
    pub fn new(inner: B) -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(AsyncHost {
            inner,
            runtime: RuntimeRef::Owned(runtime),
        })
    }

    /// Drive `inner` on the host's runtime
    pub fn with_handle(inner: B, handle: Handle) -> Self {
        AsyncHost {
            inner,
            runtime: RuntimeRef::Shared(handle),
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }
}

impl<B: AsyncBackend> Backend for AsyncHost<B> {
    fn open(&mut self, path: &str, flags: OpenFlags, mode: u32) -> io::Result<HostHandle> {
        self.runtime.block_on(self.inner.open(path, flags, mode))
    }

    fn read(&mut self, handle: HostHandle, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.runtime.block_on(self.inner.read(handle, offset, buf))
    }

    fn write(&mut self, handle: HostHandle, offset: u64, data: &[u8]) -> io::Result<usize> {
        self.runtime.block_on(self.inner.write(handle, offset, data))
    }

    fn truncate(&mut self, handle: HostHandle, size: u64) -> io::Result<()> {
        self.runtime.block_on(self.inner.truncate(handle, size))
    }

    fn sync(&mut self, handle: HostHandle, flags: SyncFlags) -> io::Result<()> {
        self.runtime.block_on(self.inner.sync(handle, flags))
    }

    fn file_size(&mut self, handle: HostHandle) -> io::Result<u64> {
        self.runtime.block_on(self.inner.file_size(handle))
    }

    fn close(&mut self, handle: HostHandle) -> io::Result<()> {
        self.runtime.block_on(self.inner.close(handle))
    }

    fn delete(&mut self, path: &str, sync_dir: bool) -> io::Result<()> {
        self.runtime.block_on(self.inner.delete(path, sync_dir))
    }

    fn access(&mut self, path: &str, mode: AccessMode) -> io::Result<bool> {
        self.runtime.block_on(self.inner.access(path, mode))
    }

    fn full_pathname(&mut self, path: &str) -> io::Result<String> {
        self.runtime.block_on(self.inner.full_pathname(path))
    }

    fn max_path_length(&self) -> usize {
        self.inner.max_path_length()
    }
}
