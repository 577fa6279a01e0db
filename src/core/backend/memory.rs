//! In-memory backend
//!
//! Files live in a [`MemoryStore`] shared between the backend (owned by the
//! I/O thread) and any number of inspectors. Open handles keep their file
//! alive after it is deleted, the way an unlinked inode stays readable.

use super::{Backend, HostHandle, DEFAULT_MAX_PATHNAME};
use crate::core::flags::{AccessMode, OpenFlags, SyncFlags};
use crate::core::path;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::sync::Arc;

/// Contents and creation mode of one stored file
#[derive(Debug)]
struct StoredFile {
    data: RwLock<Vec<u8>>,
    mode: u32,
}

/// Shared namespace of in-memory files
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    files: Arc<Mutex<HashMap<String, Arc<StoredFile>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of a file's contents
    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        let files = self.files.lock();
        files.get(path).map(|f| f.data.read().clone())
    }

    /// Create or replace a file
    pub fn insert(&self, path: &str, data: &[u8]) {
        let mut files = self.files.lock();
        files.insert(
            path.to_string(),
            Arc::new(StoredFile {
                data: RwLock::new(data.to_vec()),
                mode: crate::config::DEFAULT_CREATE_MODE,
            }),
        );
    }

    pub fn exists(&self, path: &str) -> bool {
        self.files.lock().contains_key(path)
    }

    /// Permission bits the file was created with
    pub fn mode(&self, path: &str) -> Option<u32> {
        self.files.lock().get(path).map(|f| f.mode)
    }

    /// Sorted list of stored paths
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.files.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    fn get(&self, path: &str) -> Option<Arc<StoredFile>> {
        self.files.lock().get(path).cloned()
    }
}

struct OpenFile {
    file: Arc<StoredFile>,
    writable: bool,
}

/// Backend keeping every file in memory
pub struct MemoryBackend {
    store: MemoryStore,
    handles: HashMap<HostHandle, OpenFile>,
    next_handle: HostHandle,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    /// Backend over an existing store
    pub fn with_store(store: MemoryStore) -> Self {
        MemoryBackend {
            store,
            handles: HashMap::new(),
            next_handle: 1,
        }
    }

    /// Handle for inspecting files from outside the I/O thread
    pub fn store(&self) -> MemoryStore {
        self.store.clone()
    }

    fn handle(&self, handle: HostHandle) -> io::Result<&OpenFile> {
        self.handles
            .get(&handle)
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "unknown handle"))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    fn open(&mut self, path: &str, flags: OpenFlags, mode: u32) -> io::Result<HostHandle> {
        let existing = self.store.get(path);

        let file = match existing {
            Some(_) if flags.contains(OpenFlags::EXCLUSIVE | OpenFlags::CREATE) => {
                return Err(io::Error::from(ErrorKind::AlreadyExists));
            }
            Some(file) => file,
            None if flags.contains(OpenFlags::CREATE) => {
                let file = Arc::new(StoredFile {
                    data: RwLock::new(Vec::new()),
                    mode,
                });
                self.store
                    .files
                    .lock()
                    .insert(path.to_string(), Arc::clone(&file));
                file
            }
            None => return Err(io::Error::from(ErrorKind::NotFound)),
        };

        let handle = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(
            handle,
            OpenFile {
                file,
                writable: !flags.is_read_only(),
            },
        );
        Ok(handle)
    }

    fn read(&mut self, handle: HostHandle, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let open = self.handle(handle)?;
        let data = open.file.data.read();

        if offset >= data.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write(&mut self, handle: HostHandle, offset: u64, data: &[u8]) -> io::Result<usize> {
        let open = self.handle(handle)?;
        if !open.writable {
            return Err(io::Error::from(ErrorKind::PermissionDenied));
        }

        let start = in_memory(offset)?;
        let end = start
            .checked_add(data.len())
            .ok_or_else(|| out_of_range(offset))?;
        let mut content = open.file.data.write();
        grow(&mut content, end)?;
        content[start..end].copy_from_slice(data);
        Ok(data.len())
    }

    fn truncate(&mut self, handle: HostHandle, size: u64) -> io::Result<()> {
        let open = self.handle(handle)?;
        if !open.writable {
            return Err(io::Error::from(ErrorKind::PermissionDenied));
        }
        let size = in_memory(size)?;
        let mut content = open.file.data.write();
        grow(&mut content, size)?;
        content.truncate(size);
        Ok(())
    }

    fn sync(&mut self, handle: HostHandle, _flags: SyncFlags) -> io::Result<()> {
        self.handle(handle).map(|_| ())
    }

    fn file_size(&mut self, handle: HostHandle) -> io::Result<u64> {
        let open = self.handle(handle)?;
        let size = open.file.data.read().len() as u64;
        Ok(size)
    }

    fn close(&mut self, handle: HostHandle) -> io::Result<()> {
        self.handles
            .remove(&handle)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "unknown handle"))
    }

    fn delete(&mut self, path: &str, _sync_dir: bool) -> io::Result<()> {
        match self.store.files.lock().remove(path) {
            Some(_) => Ok(()),
            None => Err(io::Error::from(ErrorKind::NotFound)),
        }
    }

    fn access(&mut self, path: &str, mode: AccessMode) -> io::Result<bool> {
        let Some(file) = self.store.get(path) else {
            return Ok(false);
        };
        Ok(match mode {
            AccessMode::Exists => true,
            AccessMode::Read => file.mode & 0o400 != 0,
            AccessMode::ReadWrite => file.mode & 0o600 == 0o600,
        })
    }

    fn full_pathname(&mut self, path: &str) -> io::Result<String> {
        Ok(path::normalize(path))
    }

    fn max_path_length(&self) -> usize {
        DEFAULT_MAX_PATHNAME
    }
}

/// Offset or size as an index into the in-memory buffer
fn in_memory(offset: u64) -> io::Result<usize> {
    usize::try_from(offset).map_err(|_| out_of_range(offset))
}

fn out_of_range(offset: u64) -> io::Error {
    io::Error::new(
        ErrorKind::InvalidInput,
        format!("offset {} is beyond the in-memory file limit", offset),
    )
}

/// Zero-extend `content` to at least `len` bytes without aborting on allocation failure
fn grow(content: &mut Vec<u8>, len: usize) -> io::Result<()> {
    if content.len() >= len {
        return Ok(());
    }
    content
        .try_reserve(len - content.len())
        .map_err(|e| io::Error::new(ErrorKind::OutOfMemory, e))?;
    content.resize(len, 0);
    Ok(())
}
