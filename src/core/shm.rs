//! WAL-index shared memory
//!
//! Each database file in WAL mode owns a list of fixed-size regions and an
//! array of eight lock slots:
//!
//! ```text
//! slot 0  WRITE        exclusive to the single writer
//! slot 1  CHECKPOINT
//! slot 2  RECOVER
//! slot 3+ READ0..READ4 shared by readers pinned to a snapshot
//! ```
//!
//! Regions are allocated densely and in index order; the first allocation
//! fixes the region size for the file. Region bytes are atomics so every
//! connection sharing a file can read and write them without data races.

use super::lock::ConnId;
use crate::error::{Result, VfsError};
use libsqlite3_sys as ffi;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::os::raw::c_int;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Number of lock slots
pub const SHM_NLOCK: usize = 8;

/// Conventional region size used by the engine's WAL index
pub const SHM_REGION_SIZE: usize = 32768;

pub const WAL_WRITE_LOCK: usize = 0;
pub const WAL_CKPT_LOCK: usize = 1;
pub const WAL_RECOVER_LOCK: usize = 2;

/// Slot index of reader mark `i` (0..=4)
pub const fn wal_read_lock(i: usize) -> usize {
    3 + i
}

/// One shared-memory region
///
/// Backed by 64-bit words so the base address meets the engine's alignment
/// requirements for the WAL-index header.
pub struct ShmRegion {
    index: usize,
    len: usize,
    words: Box<[AtomicU64]>,
}

impl ShmRegion {
    fn new(index: usize, size: usize) -> Self {
        ShmRegion {
            index,
            len: size,
            words: (0..size.div_ceil(8)).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Base address handed to the engine
    ///
    /// The memory stays valid for as long as this region is alive.
    pub fn as_ptr(&self) -> *mut u8 {
        self.words.as_ptr() as *mut u8
    }

    /// Copy bytes out of the region
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) {
        assert!(offset + buf.len() <= self.len, "read past end of region");
        for (k, dst) in buf.iter_mut().enumerate() {
            let pos = offset + k;
            *dst = self.words[pos / 8].load(Ordering::Relaxed).to_ne_bytes()[pos % 8];
        }
    }

    /// Copy bytes into the region
    pub fn write_at(&self, offset: usize, data: &[u8]) {
        assert!(offset + data.len() <= self.len, "write past end of region");
        for (k, &byte) in data.iter().enumerate() {
            let pos = offset + k;
            let _ = self.words[pos / 8].fetch_update(Ordering::Relaxed, Ordering::Relaxed, |w| {
                let mut bytes = w.to_ne_bytes();
                bytes[pos % 8] = byte;
                Some(u64::from_ne_bytes(bytes))
            });
        }
    }
}

impl std::fmt::Debug for ShmRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmRegion")
            .field("index", &self.index)
            .field("len", &self.len)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmLockMode {
    Shared,
    Exclusive,
}

/// Decoded `shm_lock` request over slots `offset..offset + n`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShmLockRequest {
    pub offset: usize,
    pub n: usize,
    pub mode: ShmLockMode,
    pub unlock: bool,
}

impl ShmLockRequest {
    pub fn lock(offset: usize, n: usize, mode: ShmLockMode) -> Self {
        ShmLockRequest {
            offset,
            n,
            mode,
            unlock: false,
        }
    }

    pub fn unlock(offset: usize, n: usize, mode: ShmLockMode) -> Self {
        ShmLockRequest {
            offset,
            n,
            mode,
            unlock: true,
        }
    }

    /// Decode the engine's `{SHARED|EXCLUSIVE} x {LOCK|UNLOCK}` flag word
    pub fn from_raw(offset: c_int, n: c_int, flags: c_int) -> Result<Self> {
        let lock = flags & ffi::SQLITE_SHM_LOCK != 0;
        let unlock = flags & ffi::SQLITE_SHM_UNLOCK != 0;
        let shared = flags & ffi::SQLITE_SHM_SHARED != 0;
        let exclusive = flags & ffi::SQLITE_SHM_EXCLUSIVE != 0;

        if lock == unlock || shared == exclusive {
            return Err(VfsError::ShmLock(format!("invalid lock flags {:#x}", flags)));
        }
        if offset < 0 || n < 1 {
            return Err(VfsError::ShmLock(format!(
                "invalid slot range {}+{}",
                offset, n
            )));
        }

        let mode = if shared {
            ShmLockMode::Shared
        } else {
            ShmLockMode::Exclusive
        };
        Ok(ShmLockRequest {
            offset: offset as usize,
            n: n as usize,
            mode,
            unlock,
        })
    }

    fn slots(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.n
    }
}

#[derive(Debug, Default, Clone)]
struct Slot {
    exclusive: Option<ConnId>,
    shared: HashSet<ConnId>,
}

impl Slot {
    fn release(&mut self, conn: ConnId) {
        if self.exclusive == Some(conn) {
            self.exclusive = None;
        }
        self.shared.remove(&conn);
    }
}

/// Shared-memory state of one database file
#[derive(Debug, Default)]
pub struct ShmFile {
    regions: Vec<Arc<ShmRegion>>,
    region_size: Option<usize>,
    /// Regions each attached connection has mapped
    mappings: HashMap<ConnId, BTreeSet<usize>>,
    slots: [Slot; SHM_NLOCK],
}

impl ShmFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Connections currently attached
    pub fn attached(&self) -> usize {
        self.mappings.len()
    }

    /// Number of connections that mapped region `index`
    pub fn ref_count(&self, index: usize) -> usize {
        self.mappings
            .values()
            .filter(|mapped| mapped.contains(&index))
            .count()
    }

    pub fn is_idle(&self) -> bool {
        self.mappings.is_empty() && self.regions.is_empty()
    }

    /// Map region `index` for `conn`
    ///
    /// A missing region is created only when `extend` is set and it is the
    /// next one in order; otherwise `Ok(None)` tells the caller the WAL index
    /// does not reach that far yet.
    pub fn map(
        &mut self,
        conn: ConnId,
        index: usize,
        size: usize,
        extend: bool,
    ) -> Result<Option<Arc<ShmRegion>>> {
        if size == 0 {
            return Err(VfsError::ShmMap("region size must be non-zero".to_string()));
        }
        if let Some(fixed) = self.region_size {
            if fixed != size {
                return Err(VfsError::ShmMap(format!(
                    "region size {} does not match established size {}",
                    size, fixed
                )));
            }
        }

        if index >= self.regions.len() {
            if !extend {
                self.mappings.entry(conn).or_default();
                return Ok(None);
            }
            if index > self.regions.len() {
                return Err(VfsError::ShmMap(format!(
                    "region {} requested before region {}",
                    index,
                    self.regions.len()
                )));
            }
            self.regions.push(Arc::new(ShmRegion::new(index, size)));
            self.region_size = Some(size);
        }

        self.mappings.entry(conn).or_default().insert(index);
        Ok(Some(Arc::clone(&self.regions[index])))
    }

    /// Apply a slot lock or unlock for `conn`
    ///
    /// The whole range is granted or nothing is.
    pub fn lock(&mut self, conn: ConnId, req: ShmLockRequest) -> Result<()> {
        if req.offset + req.n > SHM_NLOCK {
            return Err(VfsError::ShmLock(format!(
                "slot range {}+{} outside {} slots",
                req.offset, req.n, SHM_NLOCK
            )));
        }

        self.mappings.entry(conn).or_default();

        if req.unlock {
            for slot in &mut self.slots[req.slots()] {
                slot.release(conn);
            }
            return Ok(());
        }

        let range = req.slots();
        match req.mode {
            ShmLockMode::Shared => {
                let blocked = self.slots[range.clone()]
                    .iter()
                    .any(|s| matches!(s.exclusive, Some(holder) if holder != conn));
                if blocked {
                    return Err(VfsError::Busy);
                }
                for slot in &mut self.slots[range] {
                    slot.shared.insert(conn);
                }
            }
            ShmLockMode::Exclusive => {
                let blocked = self.slots[range.clone()].iter().any(|s| {
                    matches!(s.exclusive, Some(holder) if holder != conn)
                        || s.shared.iter().any(|&holder| holder != conn)
                });
                if blocked {
                    return Err(VfsError::Busy);
                }
                for slot in &mut self.slots[range] {
                    slot.exclusive = Some(conn);
                }
            }
        }
        Ok(())
    }

    /// Whether `conn` holds slot `index` in `mode`
    pub fn holds(&self, conn: ConnId, index: usize, mode: ShmLockMode) -> bool {
        let Some(slot) = self.slots.get(index) else {
            return false;
        };
        match mode {
            ShmLockMode::Shared => slot.shared.contains(&conn),
            ShmLockMode::Exclusive => slot.exclusive == Some(conn),
        }
    }

    /// Detach `conn`, releasing its slot locks and mappings
    ///
    /// Returns `true` when `delete` was set, `conn` was the last attached
    /// connection, and the regions were discarded.
    pub fn unmap(&mut self, conn: ConnId, delete: bool) -> bool {
        for slot in &mut self.slots {
            slot.release(conn);
        }
        self.mappings.remove(&conn);

        if delete && self.mappings.is_empty() {
            self.regions.clear();
            self.region_size = None;
            return true;
        }
        false
    }
}
