//! Cross-connection arbitration
//!
//! One arbiter per VFS owns every piece of state that must be visible to all
//! connections sharing a file: the advisory lock table and the WAL-index
//! regions and slots. Connections reach it only by message passing, so
//! lock decisions are serialized without any connection touching another's
//! state.

use super::bridge::Worker;
use super::lock::{ConnId, FileLocks, LockError, LockLevel};
use super::shm::{ShmFile, ShmLockRequest, ShmRegion};
use crate::error::{Result, VfsError};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Lock and SHM state for one path
#[derive(Debug, Default)]
struct SharedFile {
    locks: FileLocks,
    shm: ShmFile,
}

impl SharedFile {
    fn is_idle(&self) -> bool {
        self.locks.is_empty() && self.shm.is_idle()
    }
}

/// State owned by the arbiter thread
#[derive(Debug, Default)]
pub struct ArbiterState {
    files: HashMap<String, SharedFile>,
}

impl ArbiterState {
    fn file(&mut self, path: &str) -> &mut SharedFile {
        self.files.entry(path.to_string()).or_default()
    }

    fn prune(&mut self, path: &str) {
        if self.files.get(path).is_some_and(SharedFile::is_idle) {
            self.files.remove(path);
        }
    }
}

/// Outcome of a lock request as seen by the requesting handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockReply {
    /// Level held after the request
    pub held: LockLevel,
    /// Whether the requested level was granted
    pub granted: bool,
}

/// Handle to the arbitration thread
pub struct Arbiter {
    worker: Worker<ArbiterState>,
}

impl Arbiter {
    pub fn spawn(name: &str) -> Result<Self> {
        Ok(Arbiter {
            worker: Worker::spawn(name, ArbiterState::default())?,
        })
    }

    /// Escalate `conn`'s advisory lock on `path`
    pub fn lock(&self, path: &str, conn: ConnId, level: LockLevel) -> Result<LockReply> {
        let path = path.to_string();
        self.worker.call(move |state| {
            let result = state.file(&path).locks.acquire(conn, level);
            state.prune(&path);
            trace!(%conn, path = %path, ?level, ?result, "lock");
            lock_reply(result)
        })?
    }

    /// Lower `conn`'s advisory lock on `path`
    pub fn unlock(&self, path: &str, conn: ConnId, level: LockLevel) -> Result<LockLevel> {
        let path = path.to_string();
        self.worker.call(move |state| {
            let result = state.file(&path).locks.release(conn, level);
            state.prune(&path);
            trace!(%conn, path = %path, ?level, ?result, "unlock");
            match result {
                Ok(held) => Ok(held),
                Err(LockError::Busy(conflict)) => Ok(conflict.held),
                Err(LockError::Misuse(m)) => Err(VfsError::InvalidTransition(m.0)),
            }
        })?
    }

    /// Level `conn` holds on `path` according to the arbiter
    pub fn level_of(&self, path: &str, conn: ConnId) -> Result<LockLevel> {
        let path = path.to_string();
        self.worker.call(move |state| {
            state
                .files
                .get(&path)
                .map(|f| f.locks.level_of(conn))
                .unwrap_or_default()
        })
    }

    /// Whether any connection holds RESERVED or higher on `path`
    pub fn check_reserved(&self, path: &str) -> Result<bool> {
        let path = path.to_string();
        self.worker.call(move |state| {
            state
                .files
                .get(&path)
                .is_some_and(|f| f.locks.reserved())
        })
    }

    pub fn shm_map(
        &self,
        path: &str,
        conn: ConnId,
        index: usize,
        size: usize,
        extend: bool,
    ) -> Result<Option<Arc<ShmRegion>>> {
        let path = path.to_string();
        self.worker.call(move |state| {
            let result = state.file(&path).shm.map(conn, index, size, extend);
            if let Ok(Some(_)) = &result {
                debug!(%conn, path = %path, index, size, "shm region mapped");
            }
            result
        })?
    }

    pub fn shm_lock(&self, path: &str, conn: ConnId, req: ShmLockRequest) -> Result<()> {
        let path = path.to_string();
        self.worker.call(move |state| {
            let result = state.file(&path).shm.lock(conn, req);
            trace!(%conn, path = %path, ?req, ok = result.is_ok(), "shm lock");
            result
        })?
    }

    /// Synchronous round trip; every request sent before it has been applied
    pub fn barrier(&self) -> Result<()> {
        self.worker.call(|_| ())
    }

    /// Detach `conn` from `path`'s shared memory
    ///
    /// Returns whether the regions were discarded.
    pub fn shm_unmap(&self, path: &str, conn: ConnId, delete: bool) -> Result<bool> {
        let path = path.to_string();
        self.worker.call(move |state| {
            let deleted = state.file(&path).shm.unmap(conn, delete);
            state.prune(&path);
            debug!(%conn, path = %path, delete, deleted, "shm unmapped");
            deleted
        })
    }

    /// Number of connections that mapped region `index` of `path`
    pub fn shm_ref_count(&self, path: &str, index: usize) -> Result<usize> {
        let path = path.to_string();
        self.worker.call(move |state| {
            state
                .files
                .get(&path)
                .map_or(0, |f| f.shm.ref_count(index))
        })
    }

    /// Number of paths with live lock or SHM state
    pub fn tracked_files(&self) -> Result<usize> {
        self.worker.call(|state| state.files.len())
    }

    pub fn shutdown(&self) {
        self.worker.shutdown();
    }
}

fn lock_reply(result: std::result::Result<LockLevel, LockError>) -> Result<LockReply> {
    match result {
        Ok(held) => Ok(LockReply {
            held,
            granted: true,
        }),
        Err(LockError::Busy(conflict)) => Ok(LockReply {
            held: conflict.held,
            granted: false,
        }),
        Err(LockError::Misuse(m)) => Err(VfsError::InvalidTransition(m.0)),
    }
}
