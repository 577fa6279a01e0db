//! VFS registry
//!
//! A [`Vfs`] is the process-lifetime object behind one registered VFS name. It
//! owns the I/O servicing thread (and through it the host backend), the
//! cross-connection arbiter, and the host environment, and hands out
//! [`VfsFile`] handles bound to all three.

use super::file::VfsFile;
use crate::config::VfsConfig;
use crate::core::arbiter::Arbiter;
use crate::core::backend::{Backend, HostEnv, MemoryBackend, SystemEnv};
use crate::core::bridge::Worker;
use crate::core::flags::{AccessMode, OpenFlags};
use crate::core::lock::ConnId;
use crate::core::{path, time};
use crate::error::{IoOp, Result, VfsError};
use parking_lot::Mutex;
use std::io;
use std::os::raw::c_int;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Message reported for any attempt to load a native extension
pub const DL_ERROR_MESSAGE: &str = "Loadable extensions are not supported";

/// Bytes of host randomness in a temporary file name
const TEMP_NAME_ENTROPY: usize = 8;

/// Immutable capabilities of a VFS, fixed when it is created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VfsDescriptor {
    name: String,
    max_pathname: usize,
    create_mode: u32,
    make_default: bool,
}

impl VfsDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Longest full pathname the VFS produces
    pub fn max_pathname(&self) -> usize {
        self.max_pathname
    }

    /// Permission bits given to every created file
    pub fn create_mode(&self) -> u32 {
        self.create_mode
    }

    pub fn make_default(&self) -> bool {
        self.make_default
    }
}

/// The host I/O servicing thread
pub(crate) type IoWorker = Worker<Box<dyn Backend>>;

/// A VFS bound to one host backend
pub struct Vfs {
    descriptor: VfsDescriptor,
    io: IoWorker,
    arbiter: Arbiter,
    env: Arc<dyn HostEnv>,
    next_conn: AtomicU64,
    last_error: Mutex<Option<(c_int, String)>>,
}

impl Vfs {
    /// Create a VFS over `backend`, starting its servicing threads
    pub fn new<B, E>(config: VfsConfig, backend: B, env: E) -> Result<Arc<Self>>
    where
        B: Backend,
        E: HostEnv,
    {
        Self::from_parts(config, Box::new(backend), Arc::new(env))
    }

    fn from_parts(
        config: VfsConfig,
        backend: Box<dyn Backend>,
        env: Arc<dyn HostEnv>,
    ) -> Result<Arc<Self>> {
        config.check()?;

        let descriptor = VfsDescriptor {
            max_pathname: config
                .max_pathname
                .unwrap_or_else(|| backend.max_path_length()),
            name: config.name,
            create_mode: config.create_mode,
            make_default: config.make_default,
        };

        let io = Worker::spawn(&config.io_thread_name, backend)?;
        let arbiter = Arbiter::spawn(&format!("{}-arbiter", descriptor.name))?;

        info!(
            vfs = %descriptor.name,
            max_pathname = descriptor.max_pathname,
            "VFS created"
        );

        Ok(Arc::new(Vfs {
            descriptor,
            io,
            arbiter,
            env,
            next_conn: AtomicU64::new(1),
            last_error: Mutex::new(None),
        }))
    }

    pub fn builder() -> VfsBuilder {
        VfsBuilder::new()
    }

    pub fn descriptor(&self) -> &VfsDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub(crate) fn io(&self) -> &IoWorker {
        &self.io
    }

    pub(crate) fn arbiter(&self) -> &Arbiter {
        &self.arbiter
    }

    /// Open `path`, or an anonymous temporary file when `path` is `None`
    ///
    /// Returns the handle and the output flags, which echo the input flags.
    /// Temporary files are always deleted on close.
    pub fn open(self: &Arc<Self>, path: Option<&str>, flags: OpenFlags) -> Result<(VfsFile, OpenFlags)> {
        let (path, flags) = match path {
            Some(p) => (p.to_string(), flags),
            None => {
                let entropy = self.random_bytes(TEMP_NAME_ENTROPY);
                (
                    path::temp_name(&self.descriptor.name, &entropy),
                    flags | OpenFlags::CREATE | OpenFlags::DELETEONCLOSE,
                )
            }
        };

        // Locks and shared memory are keyed by the backend's canonical name,
        // so every spelling of one file meets the same arbiter state.
        let mode = self.descriptor.create_mode;
        let requested = path.clone();
        let (path, handle) = self
            .io
            .call(move |backend| {
                let canonical = backend.full_pathname(&requested)?;
                let handle = backend.open(&canonical, flags, mode)?;
                Ok::<_, io::Error>((canonical, handle))
            })?
            .map_err(|source| VfsError::CantOpen {
                path: path.clone(),
                source,
            })?;

        let conn = ConnId(self.next_conn.fetch_add(1, Ordering::Relaxed));
        debug!(vfs = %self.descriptor.name, %conn, path = %path, ?flags, "file opened");

        Ok((VfsFile::new(Arc::clone(self), conn, path, handle, flags), flags))
    }

    /// Remove `path` from the backend
    pub fn delete(&self, path: &str, sync_dir: bool) -> Result<()> {
        let host_path = path.to_string();
        self.io
            .call(move |backend| {
                let canonical = backend.full_pathname(&host_path)?;
                backend.delete(&canonical, sync_dir)
            })?
            .map_err(|e| VfsError::io(IoOp::Delete, e))?;
        debug!(vfs = %self.descriptor.name, path, "file deleted");
        Ok(())
    }

    pub fn access(&self, path: &str, mode: AccessMode) -> Result<bool> {
        let host_path = path.to_string();
        self.io
            .call(move |backend| backend.access(&host_path, mode))?
            .map_err(|e| VfsError::io(IoOp::Access, e))
    }

    /// Absolute form of `path`, bounded by the maximum pathname length
    pub fn full_pathname(&self, path: &str) -> Result<String> {
        let host_path = path.to_string();
        let full = self
            .io
            .call(move |backend| backend.full_pathname(&host_path))?
            .map_err(|e| VfsError::io(IoOp::FullPathname, e))?;
        path::bounded(full, self.descriptor.max_pathname)
    }

    /// Fill `buf` from the host's random source
    pub fn randomness(&self, buf: &mut [u8]) {
        self.env.random_bytes(buf);
    }

    pub fn random_bytes(&self, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        self.randomness(&mut buf);
        buf
    }

    /// Block the calling thread for at least `duration`
    ///
    /// The host sleeps in whole milliseconds, so the duration is rounded up;
    /// the rounded value is returned.
    pub fn sleep(&self, duration: Duration) -> Duration {
        let ms = duration.as_micros().div_ceil(1000) as u64;
        trace!(ms, "sleep");
        self.env.blocking_sleep(ms);
        Duration::from_millis(ms)
    }

    /// Current time as Julian milliseconds
    pub fn current_time_int64(&self) -> i64 {
        time::julian_ms_from_unix_ms(self.env.now_millis())
    }

    /// Current time as a fractional Julian day
    pub fn current_time(&self) -> f64 {
        time::julian_day_from_unix_ms(self.env.now_millis())
    }

    /// Native extension loading is refused
    pub fn dl_open(&self, path: &str) -> Result<()> {
        debug!(vfs = %self.descriptor.name, path, "refused extension load");
        Err(VfsError::NotFound(DL_ERROR_MESSAGE.to_string()))
    }

    pub fn dl_error(&self) -> &'static str {
        DL_ERROR_MESSAGE
    }

    /// Most recent error recorded at the engine boundary
    pub fn last_error(&self) -> Option<(c_int, String)> {
        self.last_error.lock().clone()
    }

    pub(crate) fn record_error(&self, err: &VfsError) {
        *self.last_error.lock() = Some((err.code(), err.to_string()));
    }
}

impl Drop for Vfs {
    fn drop(&mut self) {
        self.io.shutdown();
        self.arbiter.shutdown();
        debug!(vfs = %self.descriptor.name, "VFS shut down");
    }
}

/// Builder for [`Vfs`]
///
/// ```
/// use hostvfs::{MemoryBackend, Vfs};
///
/// let vfs = Vfs::builder()
///     .name("docs-example")
///     .max_pathname(512)
///     .backend(MemoryBackend::new())
///     .build()
///     .unwrap();
///
/// assert_eq!(vfs.descriptor().max_pathname(), 512);
/// ```
pub struct VfsBuilder {
    config: VfsConfig,
    backend: Option<Box<dyn Backend>>,
    env: Option<Arc<dyn HostEnv>>,
}

impl VfsBuilder {
    pub fn new() -> Self {
        VfsBuilder {
            config: VfsConfig::default(),
            backend: None,
            env: None,
        }
    }

    /// Start from a loaded configuration
    pub fn config(mut self, config: VfsConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn max_pathname(mut self, max: usize) -> Self {
        self.config.max_pathname = Some(max);
        self
    }

    pub fn create_mode(mut self, mode: u32) -> Self {
        self.config.create_mode = mode;
        self
    }

    pub fn make_default(mut self, yes: bool) -> Self {
        self.config.make_default = yes;
        self
    }

    pub fn backend<B: Backend>(mut self, backend: B) -> Self {
        self.backend = Some(Box::new(backend));
        self
    }

    pub fn env<E: HostEnv>(mut self, env: E) -> Self {
        self.env = Some(Arc::new(env));
        self
    }

    /// Create the VFS; defaults to an in-memory backend and the system env
    pub fn build(self) -> Result<Arc<Vfs>> {
        let backend = self
            .backend
            .unwrap_or_else(|| Box::new(MemoryBackend::new()));
        let env = self.env.unwrap_or_else(|| Arc::new(SystemEnv));
        Vfs::from_parts(self.config, backend, env)
    }
}

impl Default for VfsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
