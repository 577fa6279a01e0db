//! Per-file handles
//!
//! A [`VfsFile`] is what the engine holds for every open file. Byte I/O is
//! forwarded to the VFS's I/O servicing thread; advisory locks and WAL-index
//! shared memory are forwarded to the arbiter. The handle itself only keeps
//! a cached view of its own lock level and the regions it has mapped.

use super::registry::Vfs;
use crate::core::backend::HostHandle;
use crate::core::flags::{OpenFlags, SyncFlags};
use crate::core::lock::{ConnId, LockLevel};
use crate::core::shm::{ShmLockRequest, ShmRegion};
use crate::error::{IoOp, Result, VfsError};
use std::collections::BTreeMap;
use std::io;
use std::os::raw::c_int;
use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// How a read completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The whole buffer came from the file
    Complete,
    /// The file ended after `read` bytes; the rest of the buffer is zeroed
    Short { read: usize },
}

/// Operations the engine performs on an open file
pub trait FileMethods: Send {
    fn close(&mut self) -> Result<()>;

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<ReadOutcome>;

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    fn truncate(&mut self, size: u64) -> Result<()>;

    fn sync(&mut self, flags: SyncFlags) -> Result<()>;

    fn file_size(&mut self) -> Result<u64>;

    /// Escalate the advisory lock; only ever raises the held level
    fn lock(&mut self, level: LockLevel) -> Result<()>;

    /// Lower the advisory lock to SHARED or NONE
    fn unlock(&mut self, level: LockLevel) -> Result<()>;

    /// Whether any connection holds RESERVED or higher on this file
    fn check_reserved_lock(&mut self) -> Result<bool>;

    fn file_control(&mut self, op: c_int) -> Result<()>;

    fn sector_size(&self) -> u32;

    fn device_characteristics(&self) -> u32;

    fn shm_map(&mut self, index: usize, size: usize, extend: bool)
        -> Result<Option<Arc<ShmRegion>>>;

    fn shm_lock(&mut self, req: ShmLockRequest) -> Result<()>;

    fn shm_barrier(&mut self);

    fn shm_unmap(&mut self, delete: bool) -> Result<()>;
}

/// An open file on a [`Vfs`]
pub struct VfsFile {
    vfs: Arc<Vfs>,
    conn: ConnId,
    path: String,
    handle: HostHandle,
    flags: OpenFlags,
    /// Last level reported by the arbiter; `None` once a lock call has failed
    /// in transit and the real level is unknown
    lock: Option<LockLevel>,
    mapped: BTreeMap<usize, Arc<ShmRegion>>,
    shm_attached: bool,
    closed: bool,
}

impl VfsFile {
    pub(crate) fn new(
        vfs: Arc<Vfs>,
        conn: ConnId,
        path: String,
        handle: HostHandle,
        flags: OpenFlags,
    ) -> Self {
        VfsFile {
            vfs,
            conn,
            path,
            handle,
            flags,
            lock: Some(LockLevel::None),
            mapped: BTreeMap::new(),
            shm_attached: false,
            closed: false,
        }
    }

    pub fn vfs(&self) -> &Arc<Vfs> {
        &self.vfs
    }

    pub fn conn(&self) -> ConnId {
        self.conn
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Lock level held by this handle, asking the arbiter if the cache is stale
    pub fn lock_level(&mut self) -> Result<LockLevel> {
        self.ensure_open()?;
        match self.lock {
            Some(level) => Ok(level),
            None => {
                let level = self.vfs.arbiter().level_of(&self.path, self.conn)?;
                self.lock = Some(level);
                Ok(level)
            }
        }
    }

    /// Indices of the SHM regions this handle has mapped
    pub fn mapped_regions(&self) -> Vec<usize> {
        self.mapped.keys().copied().collect()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(VfsError::Closed);
        }
        Ok(())
    }

    fn release_all(&mut self) -> Result<()> {
        if self.lock == Some(LockLevel::None) {
            return Ok(());
        }
        let held = self
            .vfs
            .arbiter()
            .unlock(&self.path, self.conn, LockLevel::None)?;
        self.lock = Some(held);
        Ok(())
    }

    fn detach_shm(&mut self, delete: bool) -> Result<()> {
        self.mapped.clear();
        if !self.shm_attached {
            return Ok(());
        }
        self.shm_attached = false;
        self.vfs
            .arbiter()
            .shm_unmap(&self.path, self.conn, delete)
            .map_err(shm_map_error)?;
        Ok(())
    }

    fn close_host_file(&mut self) -> Result<()> {
        let handle = self.handle;
        self.vfs
            .io()
            .call(move |backend| backend.close(handle))?
            .map_err(|e| VfsError::io(IoOp::Close, e))?;

        if self.flags.contains(OpenFlags::DELETEONCLOSE) {
            self.vfs.delete(&self.path, false)?;
        }
        Ok(())
    }
}

impl FileMethods for VfsFile {
    /// Release every lock and mapping, then close the host file
    ///
    /// The handle is unusable afterwards even when a step fails; the first
    /// failure is returned.
    fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.closed = true;

        let unlocked = self.release_all();
        let detached = self.detach_shm(false);
        let closed = self.close_host_file();

        debug!(conn = %self.conn, path = %self.path, "file closed");
        unlocked.and(detached).and(closed)
    }

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<ReadOutcome> {
        self.ensure_open()?;
        let handle = self.handle;
        let len = buf.len();

        let (data, n) = self
            .vfs
            .io()
            .call(move |backend| {
                let mut data = vec![0u8; len];
                backend.read(handle, offset, &mut data).map(|n| (data, n))
            })?
            .map_err(|e| VfsError::io(IoOp::Read, e))?;

        let n = n.min(len);
        buf[..n].copy_from_slice(&data[..n]);
        buf[n..].fill(0);

        if n < len {
            trace!(conn = %self.conn, offset, len, read = n, "short read");
            return Ok(ReadOutcome::Short { read: n });
        }
        Ok(ReadOutcome::Complete)
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let handle = self.handle;
        let len = data.len();
        let data = data.to_vec();

        let written = self
            .vfs
            .io()
            .call(move |backend| backend.write(handle, offset, &data))?
            .map_err(|e| VfsError::io(IoOp::Write, e))?;

        if written != len {
            return Err(VfsError::io(
                IoOp::Write,
                io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("wrote {} of {} bytes", written, len),
                ),
            ));
        }
        Ok(())
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        self.ensure_open()?;
        let handle = self.handle;
        self.vfs
            .io()
            .call(move |backend| backend.truncate(handle, size))?
            .map_err(|e| VfsError::io(IoOp::Truncate, e))
    }

    fn sync(&mut self, flags: SyncFlags) -> Result<()> {
        self.ensure_open()?;
        let handle = self.handle;
        self.vfs
            .io()
            .call(move |backend| backend.sync(handle, flags))?
            .map_err(|e| VfsError::io(IoOp::Sync, e))
    }

    fn file_size(&mut self) -> Result<u64> {
        self.ensure_open()?;
        let handle = self.handle;
        self.vfs
            .io()
            .call(move |backend| backend.file_size(handle))?
            .map_err(|e| VfsError::io(IoOp::FileSize, e))
    }

    fn lock(&mut self, level: LockLevel) -> Result<()> {
        self.ensure_open()?;
        if self.lock.is_some_and(|held| held >= level) {
            return Ok(());
        }

        let reply = match self.vfs.arbiter().lock(&self.path, self.conn, level) {
            Ok(reply) => reply,
            Err(e) => {
                if !matches!(e, VfsError::InvalidTransition(_)) {
                    self.lock = None;
                }
                return Err(e);
            }
        };

        self.lock = Some(reply.held);
        if !reply.granted {
            trace!(conn = %self.conn, path = %self.path, ?level, held = ?reply.held, "lock busy");
            return Err(VfsError::Busy);
        }
        Ok(())
    }

    fn unlock(&mut self, level: LockLevel) -> Result<()> {
        self.ensure_open()?;
        if self.lock.is_some_and(|held| held <= level) {
            return Ok(());
        }

        match self.vfs.arbiter().unlock(&self.path, self.conn, level) {
            Ok(held) => {
                self.lock = Some(held);
                Ok(())
            }
            Err(e) => {
                if !matches!(e, VfsError::InvalidTransition(_)) {
                    self.lock = None;
                }
                Err(e)
            }
        }
    }

    fn check_reserved_lock(&mut self) -> Result<bool> {
        self.ensure_open()?;
        if self.lock.is_some_and(|held| held >= LockLevel::Reserved) {
            return Ok(true);
        }
        self.vfs.arbiter().check_reserved(&self.path)
    }

    fn file_control(&mut self, op: c_int) -> Result<()> {
        self.ensure_open()?;
        Err(VfsError::NotFound(format!("file control {}", op)))
    }

    fn sector_size(&self) -> u32 {
        0
    }

    fn device_characteristics(&self) -> u32 {
        0
    }

    fn shm_map(
        &mut self,
        index: usize,
        size: usize,
        extend: bool,
    ) -> Result<Option<Arc<ShmRegion>>> {
        self.ensure_open()?;
        if let Some(region) = self.mapped.get(&index) {
            return Ok(Some(Arc::clone(region)));
        }

        let region = self
            .vfs
            .arbiter()
            .shm_map(&self.path, self.conn, index, size, extend)
            .map_err(shm_map_error)?;
        self.shm_attached = true;

        if let Some(region) = &region {
            self.mapped.insert(index, Arc::clone(region));
        }
        Ok(region)
    }

    fn shm_lock(&mut self, req: ShmLockRequest) -> Result<()> {
        self.ensure_open()?;
        self.shm_attached = true;
        self.vfs
            .arbiter()
            .shm_lock(&self.path, self.conn, req)
            .map_err(|e| match e {
                VfsError::Busy | VfsError::ShmLock(_) => e,
                other => VfsError::ShmLock(other.to_string()),
            })
    }

    fn shm_barrier(&mut self) {
        fence(Ordering::SeqCst);
        if let Err(e) = self.vfs.arbiter().barrier() {
            warn!(conn = %self.conn, error = %e, "shm barrier failed");
        }
    }

    fn shm_unmap(&mut self, delete: bool) -> Result<()> {
        self.ensure_open()?;
        self.detach_shm(delete)
    }
}

impl Drop for VfsFile {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        warn!(conn = %self.conn, path = %self.path, "file dropped without close");
        if let Err(e) = self.close() {
            warn!(conn = %self.conn, error = %e, "close on drop failed");
        }
    }
}

fn shm_map_error(e: VfsError) -> VfsError {
    match e {
        VfsError::ShmMap(_) => e,
        other => VfsError::ShmMap(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::MemoryBackend;
    use crate::core::shm::{ShmLockMode, SHM_REGION_SIZE, WAL_WRITE_LOCK};

    fn vfs(name: &str) -> Arc<Vfs> {
        Vfs::builder()
            .name(name)
            .backend(MemoryBackend::new())
            .build()
            .unwrap()
    }

    fn rw() -> OpenFlags {
        OpenFlags::READWRITE | OpenFlags::CREATE | OpenFlags::MAIN_DB
    }

    #[test]
    fn test_read_past_end_zero_fills() {
        let vfs = vfs("file-test-short");
        let (mut file, _) = vfs.open(Some("/a.db"), rw()).unwrap();
        file.write(0, b"abc").unwrap();

        let mut buf = [0xffu8; 8];
        assert_eq!(file.read(0, &mut buf).unwrap(), ReadOutcome::Short { read: 3 });
        assert_eq!(&buf, b"abc\0\0\0\0\0");

        let mut buf = [0xffu8; 4];
        assert_eq!(file.read(100, &mut buf).unwrap(), ReadOutcome::Short { read: 0 });
        assert_eq!(buf, [0; 4]);

        file.close().unwrap();
    }

    #[test]
    fn test_closed_handle_refuses_everything() {
        let vfs = vfs("file-test-closed");
        let (mut file, _) = vfs.open(Some("/b.db"), rw()).unwrap();
        file.close().unwrap();

        assert!(matches!(file.close(), Err(VfsError::Closed)));
        assert!(matches!(file.file_size(), Err(VfsError::Closed)));
        assert!(matches!(file.lock(LockLevel::Shared), Err(VfsError::Closed)));
        assert_eq!(VfsError::Closed.code(), libsqlite3_sys::SQLITE_MISUSE);
    }

    #[test]
    fn test_close_releases_locks_and_shm() {
        let vfs = vfs("file-test-release");
        let (mut a, _) = vfs.open(Some("/c.db"), rw()).unwrap();
        let (mut b, _) = vfs.open(Some("/c.db"), rw()).unwrap();

        a.lock(LockLevel::Shared).unwrap();
        a.lock(LockLevel::Reserved).unwrap();
        a.shm_map(0, SHM_REGION_SIZE, true).unwrap();
        a.shm_lock(ShmLockRequest::lock(WAL_WRITE_LOCK, 1, ShmLockMode::Exclusive))
            .unwrap();

        b.lock(LockLevel::Shared).unwrap();
        assert!(b.check_reserved_lock().unwrap());
        assert!(matches!(
            b.shm_lock(ShmLockRequest::lock(WAL_WRITE_LOCK, 1, ShmLockMode::Exclusive)),
            Err(VfsError::Busy)
        ));

        a.close().unwrap();

        assert!(!b.check_reserved_lock().unwrap());
        b.lock(LockLevel::Reserved).unwrap();
        b.shm_lock(ShmLockRequest::lock(WAL_WRITE_LOCK, 1, ShmLockMode::Exclusive))
            .unwrap();
        b.close().unwrap();
    }

    #[test]
    fn test_lock_cache_tracks_pending() {
        let vfs = vfs("file-test-pending");
        let (mut a, _) = vfs.open(Some("/d.db"), rw()).unwrap();
        let (mut b, _) = vfs.open(Some("/d.db"), rw()).unwrap();

        a.lock(LockLevel::Shared).unwrap();
        b.lock(LockLevel::Shared).unwrap();

        assert!(matches!(a.lock(LockLevel::Exclusive), Err(VfsError::Busy)));
        assert_eq!(a.lock_level().unwrap(), LockLevel::Pending);

        b.unlock(LockLevel::None).unwrap();
        a.lock(LockLevel::Exclusive).unwrap();
        assert_eq!(a.lock_level().unwrap(), LockLevel::Exclusive);

        a.unlock(LockLevel::Shared).unwrap();
        assert_eq!(a.lock_level().unwrap(), LockLevel::Shared);
    }

    #[test]
    fn test_shm_regions_are_shared_between_handles() {
        let vfs = vfs("file-test-shm");
        let (mut a, _) = vfs.open(Some("/e.db"), rw()).unwrap();
        let (mut b, _) = vfs.open(Some("/e.db"), rw()).unwrap();

        assert!(b.shm_map(0, SHM_REGION_SIZE, false).unwrap().is_none());
        let ra = a.shm_map(0, SHM_REGION_SIZE, true).unwrap().unwrap();
        ra.write_at(16, b"wal-index");
        a.shm_barrier();

        let rb = b.shm_map(0, SHM_REGION_SIZE, false).unwrap().unwrap();
        let mut seen = [0u8; 9];
        rb.read_at(16, &mut seen);
        assert_eq!(&seen, b"wal-index");
        assert_eq!(ra.as_ptr(), rb.as_ptr());

        assert!(matches!(
            a.shm_map(2, SHM_REGION_SIZE, true),
            Err(VfsError::ShmMap(_))
        ));
        assert_eq!(a.mapped_regions(), vec![0]);
    }

    #[test]
    fn test_file_control_and_characteristics() {
        let vfs = vfs("file-test-fcntl");
        let (mut file, _) = vfs.open(Some("/f.db"), rw()).unwrap();
        let err = file.file_control(libsqlite3_sys::SQLITE_FCNTL_SIZE_HINT).unwrap_err();
        assert_eq!(err.code(), libsqlite3_sys::SQLITE_NOTFOUND);
        assert_eq!(file.sector_size(), 0);
        assert_eq!(file.device_characteristics(), 0);
    }

    #[test]
    fn test_temp_file_deleted_on_close() {
        let store = crate::core::backend::MemoryStore::new();
        let vfs = Vfs::builder()
            .name("file-test-temp")
            .backend(MemoryBackend::with_store(store.clone()))
            .build()
            .unwrap();

        let (mut file, flags) = vfs.open(None, OpenFlags::READWRITE).unwrap();
        assert!(flags.contains(OpenFlags::DELETEONCLOSE));
        assert!(file.path().starts_with("/file-test-temp-tmp-"));
        file.write(0, b"scratch").unwrap();
        assert!(store.exists(file.path()));

        let path = file.path().to_string();
        file.close().unwrap();
        assert!(!store.exists(&path));
    }
}
