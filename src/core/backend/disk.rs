//! Disk backend over `std::fs`
//!
//! Engine paths are virtual absolute paths (`/app.db`) resolved beneath a root
//! directory, so a database and its journal, WAL and temporary files always
//! stay inside the root.

use super::{Backend, HostHandle, DEFAULT_MAX_PATHNAME};
use crate::core::flags::{AccessMode, OpenFlags, SyncFlags};
use crate::core::path;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Backend storing files beneath a root directory
pub struct DiskBackend {
    root: PathBuf,
    files: HashMap<HostHandle, File>,
    next_handle: HostHandle,
}

impl DiskBackend {
    /// Create a backend rooted at `root`, creating the directory if needed
    pub fn new<P: AsRef<Path>>(root: P) -> io::Result<Self> {
        std::fs::create_dir_all(root.as_ref())?;
        Ok(DiskBackend {
            root: root.as_ref().to_path_buf(),
            files: HashMap::new(),
            next_handle: 1,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host location of a virtual path
    pub fn resolve(&self, vpath: &str) -> PathBuf {
        let normalized = path::normalize(vpath);
        self.root.join(normalized.trim_start_matches('/'))
    }

    fn file(&mut self, handle: HostHandle) -> io::Result<&mut File> {
        self.files
            .get_mut(&handle)
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "unknown handle"))
    }
}

impl Backend for DiskBackend {
    fn open(&mut self, vpath: &str, flags: OpenFlags, mode: u32) -> io::Result<HostHandle> {
        let host_path = self.resolve(vpath);
        if let Some(parent) = host_path.parent() {
            if flags.contains(OpenFlags::CREATE) {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut options = OpenOptions::new();
        options.read(true);
        if !flags.is_read_only() {
            options.write(true);
            if flags.contains(OpenFlags::EXCLUSIVE | OpenFlags::CREATE) {
                options.create_new(true);
            } else if flags.contains(OpenFlags::CREATE) {
                options.create(true);
            }
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;

        let file = options.open(&host_path)?;
        let handle = self.next_handle;
        self.next_handle += 1;
        self.files.insert(handle, file);
        Ok(handle)
    }

    fn read(&mut self, handle: HostHandle, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let file = self.file(handle)?;
        file.seek(SeekFrom::Start(offset))?;

        let mut total = 0;
        while total < buf.len() {
            match file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    fn write(&mut self, handle: HostHandle, offset: u64, data: &[u8]) -> io::Result<usize> {
        let file = self.file(handle)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(data.len())
    }

    fn truncate(&mut self, handle: HostHandle, size: u64) -> io::Result<()> {
        self.file(handle)?.set_len(size)
    }

    fn sync(&mut self, handle: HostHandle, flags: SyncFlags) -> io::Result<()> {
        let file = self.file(handle)?;
        if flags.data_only {
            file.sync_data()
        } else {
            file.sync_all()
        }
    }

    fn file_size(&mut self, handle: HostHandle) -> io::Result<u64> {
        Ok(self.file(handle)?.metadata()?.len())
    }

    fn close(&mut self, handle: HostHandle) -> io::Result<()> {
        self.files
            .remove(&handle)
            .map(drop)
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "unknown handle"))
    }

    fn delete(&mut self, vpath: &str, sync_dir: bool) -> io::Result<()> {
        let host_path = self.resolve(vpath);
        std::fs::remove_file(&host_path)?;

        #[cfg(unix)]
        {
            if sync_dir {
                if let Some(parent) = host_path.parent() {
                    File::open(parent)?.sync_all()?;
                }
            }
        }
        #[cfg(not(unix))]
        let _ = sync_dir;

        Ok(())
    }

    fn access(&mut self, vpath: &str, mode: AccessMode) -> io::Result<bool> {
        let metadata = match std::fs::metadata(self.resolve(vpath)) {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        Ok(match mode {
            AccessMode::Exists | AccessMode::Read => true,
            AccessMode::ReadWrite => !metadata.permissions().readonly(),
        })
    }

    fn full_pathname(&mut self, vpath: &str) -> io::Result<String> {
        Ok(path::normalize(vpath))
    }

    fn max_path_length(&self) -> usize {
        DEFAULT_MAX_PATHNAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_paths_stay_under_root() {
        let dir = TempDir::new().unwrap();
        let backend = DiskBackend::new(dir.path()).unwrap();
        assert_eq!(backend.resolve("/a/b.db"), dir.path().join("a/b.db"));
        assert_eq!(backend.resolve("/../../etc/passwd"), dir.path().join("etc/passwd"));
    }

    #[test]
    fn test_write_read_truncate() {
        let dir = TempDir::new().unwrap();
        let mut backend = DiskBackend::new(dir.path()).unwrap();
        let flags = OpenFlags::READWRITE | OpenFlags::CREATE;
        let h = backend.open("/test.db", flags, 0o600).unwrap();

        backend.write(h, 0, b"hello world").unwrap();
        backend.sync(h, SyncFlags::default()).unwrap();
        assert_eq!(backend.file_size(h).unwrap(), 11);

        let mut buf = [0u8; 16];
        assert_eq!(backend.read(h, 6, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"world");

        backend.truncate(h, 5).unwrap();
        assert_eq!(backend.file_size(h).unwrap(), 5);
        backend.close(h).unwrap();

        assert_eq!(std::fs::read(dir.path().join("test.db")).unwrap(), b"hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_creation_mode_applied() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let mut backend = DiskBackend::new(dir.path()).unwrap();
        let h = backend
            .open("/mode.db", OpenFlags::READWRITE | OpenFlags::CREATE, 0o600)
            .unwrap();
        backend.close(h).unwrap();

        let mode = std::fs::metadata(dir.path().join("mode.db"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_delete_and_access() {
        let dir = TempDir::new().unwrap();
        let mut backend = DiskBackend::new(dir.path()).unwrap();
        let h = backend
            .open("/j.db-journal", OpenFlags::READWRITE | OpenFlags::CREATE, 0o600)
            .unwrap();
        backend.close(h).unwrap();

        assert!(backend.access("/j.db-journal", AccessMode::Exists).unwrap());
        backend.delete("/j.db-journal", true).unwrap();
        assert!(!backend.access("/j.db-journal", AccessMode::Exists).unwrap());

        let err = backend.delete("/j.db-journal", false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_open_missing_read_only() {
        let dir = TempDir::new().unwrap();
        let mut backend = DiskBackend::new(dir.path()).unwrap();
        assert!(backend.open("/nope.db", OpenFlags::READONLY, 0o600).is_err());
    }
}
