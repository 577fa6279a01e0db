//! SQLite file I/O methods
//!
//! Every `sqlite3_file` the engine opens through this VFS is a [`SqliteFile`]:
//! the engine's base struct followed by the owned [`VfsFile`].

use super::file::{FileMethods, ReadOutcome, VfsFile};
use super::sqlite::vfs_of;
use crate::core::flags::{OpenFlags, SyncFlags};
use crate::core::lock::LockLevel;
use crate::core::shm::ShmLockRequest;
use crate::error::VfsError;
use libsqlite3_sys as ffi;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;

/// Engine-allocated file storage
#[repr(C)]
pub struct SqliteFile {
    /// Base sqlite3_file structure (MUST be first field)
    base: ffi::sqlite3_file,
    file: Option<VfsFile>,
}

static IO_METHODS: ffi::sqlite3_io_methods = ffi::sqlite3_io_methods {
    iVersion: 2,
    xClose: Some(file_close),
    xRead: Some(file_read),
    xWrite: Some(file_write),
    xTruncate: Some(file_truncate),
    xSync: Some(file_sync),
    xFileSize: Some(file_size),
    xLock: Some(file_lock),
    xUnlock: Some(file_unlock),
    xCheckReservedLock: Some(file_check_reserved_lock),
    xFileControl: Some(file_control),
    xSectorSize: Some(file_sector_size),
    xDeviceCharacteristics: Some(file_device_characteristics),
    xShmMap: Some(file_shm_map),
    xShmLock: Some(file_shm_lock),
    xShmBarrier: Some(file_shm_barrier),
    xShmUnmap: Some(file_shm_unmap),
    xFetch: None,
    xUnfetch: None,
};

pub(super) unsafe fn file_open(
    vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    file: *mut ffi::sqlite3_file,
    flags: c_int,
    p_out_flags: *mut c_int,
) -> c_int {
    let slot = file as *mut SqliteFile;
    // The engine hands over uninitialized memory
    ptr::write(
        slot,
        SqliteFile {
            base: ffi::sqlite3_file {
                pMethods: ptr::null(),
            },
            file: None,
        },
    );

    let Some(vfs) = vfs_of(vfs) else {
        return ffi::SQLITE_ERROR;
    };

    let path = if z_name.is_null() {
        None
    } else {
        match CStr::from_ptr(z_name).to_str() {
            Ok(p) => Some(p),
            Err(_) => return ffi::SQLITE_CANTOPEN,
        }
    };

    match vfs.open(path, OpenFlags::from_bits_retain(flags)) {
        Ok((handle, out_flags)) => {
            (*slot).file = Some(handle);
            (*slot).base.pMethods = &IO_METHODS;
            if !p_out_flags.is_null() {
                *p_out_flags = out_flags.bits();
            }
            ffi::SQLITE_OK
        }
        Err(e) => {
            vfs.record_error(&e);
            e.code()
        }
    }
}

unsafe fn handle<'a>(file: *mut ffi::sqlite3_file) -> Option<&'a mut VfsFile> {
    (*(file as *mut SqliteFile)).file.as_mut()
}

/// Engine status for `result`, recording failures as the VFS's last error
fn status<T>(file: &VfsFile, result: crate::error::Result<T>) -> c_int {
    match result {
        Ok(_) => ffi::SQLITE_OK,
        Err(VfsError::Busy) => ffi::SQLITE_BUSY,
        Err(e) => {
            file.vfs().record_error(&e);
            e.code()
        }
    }
}

unsafe extern "C" fn file_close(file: *mut ffi::sqlite3_file) -> c_int {
    let Some(mut inner) = (*(file as *mut SqliteFile)).file.take() else {
        return ffi::SQLITE_MISUSE;
    };
    let result = inner.close();
    status(&inner, result)
}

unsafe extern "C" fn file_read(
    file: *mut ffi::sqlite3_file,
    buf: *mut c_void,
    amt: c_int,
    offset: ffi::sqlite3_int64,
) -> c_int {
    let Some(inner) = handle(file) else {
        return ffi::SQLITE_MISUSE;
    };
    if offset < 0 || amt < 0 {
        return ffi::SQLITE_IOERR_READ;
    }

    let buf = std::slice::from_raw_parts_mut(buf as *mut u8, amt as usize);
    match inner.read(offset as u64, buf) {
        Ok(ReadOutcome::Complete) => ffi::SQLITE_OK,
        Ok(ReadOutcome::Short { .. }) => ffi::SQLITE_IOERR_SHORT_READ,
        Err(e) => status::<()>(inner, Err(e)),
    }
}

unsafe extern "C" fn file_write(
    file: *mut ffi::sqlite3_file,
    buf: *const c_void,
    amt: c_int,
    offset: ffi::sqlite3_int64,
) -> c_int {
    let Some(inner) = handle(file) else {
        return ffi::SQLITE_MISUSE;
    };
    if offset < 0 || amt < 0 {
        return ffi::SQLITE_IOERR_WRITE;
    }

    let data = std::slice::from_raw_parts(buf as *const u8, amt as usize);
    let result = inner.write(offset as u64, data);
    status(inner, result)
}

unsafe extern "C" fn file_truncate(file: *mut ffi::sqlite3_file, size: ffi::sqlite3_int64) -> c_int {
    let Some(inner) = handle(file) else {
        return ffi::SQLITE_MISUSE;
    };
    if size < 0 {
        return ffi::SQLITE_IOERR_TRUNCATE;
    }
    let result = inner.truncate(size as u64);
    status(inner, result)
}

unsafe extern "C" fn file_sync(file: *mut ffi::sqlite3_file, flags: c_int) -> c_int {
    let Some(inner) = handle(file) else {
        return ffi::SQLITE_MISUSE;
    };
    let result = inner.sync(SyncFlags::from_raw(flags));
    status(inner, result)
}

unsafe extern "C" fn file_size(file: *mut ffi::sqlite3_file, p_size: *mut ffi::sqlite3_int64) -> c_int {
    let Some(inner) = handle(file) else {
        return ffi::SQLITE_MISUSE;
    };
    match inner.file_size() {
        Ok(size) => {
            *p_size = size as ffi::sqlite3_int64;
            ffi::SQLITE_OK
        }
        Err(e) => status::<()>(inner, Err(e)),
    }
}

unsafe extern "C" fn file_lock(file: *mut ffi::sqlite3_file, level: c_int) -> c_int {
    let Some(inner) = handle(file) else {
        return ffi::SQLITE_MISUSE;
    };
    let Some(level) = LockLevel::from_raw(level) else {
        return ffi::SQLITE_MISUSE;
    };
    let result = inner.lock(level);
    status(inner, result)
}

unsafe extern "C" fn file_unlock(file: *mut ffi::sqlite3_file, level: c_int) -> c_int {
    let Some(inner) = handle(file) else {
        return ffi::SQLITE_MISUSE;
    };
    let Some(level) = LockLevel::from_raw(level) else {
        return ffi::SQLITE_MISUSE;
    };
    let result = inner.unlock(level);
    status(inner, result)
}

unsafe extern "C" fn file_check_reserved_lock(
    file: *mut ffi::sqlite3_file,
    p_res_out: *mut c_int,
) -> c_int {
    *p_res_out = 0;
    let Some(inner) = handle(file) else {
        return ffi::SQLITE_MISUSE;
    };
    match inner.check_reserved_lock() {
        Ok(reserved) => {
            *p_res_out = reserved as c_int;
            ffi::SQLITE_OK
        }
        Err(e) => status::<()>(inner, Err(e)),
    }
}

unsafe extern "C" fn file_control(file: *mut ffi::sqlite3_file, op: c_int, _arg: *mut c_void) -> c_int {
    let Some(inner) = handle(file) else {
        return ffi::SQLITE_MISUSE;
    };
    // Not recorded as the last error; the engine probes many opcodes
    match inner.file_control(op) {
        Ok(()) => ffi::SQLITE_OK,
        Err(e) => e.code(),
    }
}

unsafe extern "C" fn file_sector_size(file: *mut ffi::sqlite3_file) -> c_int {
    handle(file).map_or(0, |f| f.sector_size() as c_int)
}

unsafe extern "C" fn file_device_characteristics(file: *mut ffi::sqlite3_file) -> c_int {
    handle(file).map_or(0, |f| f.device_characteristics() as c_int)
}

unsafe extern "C" fn file_shm_map(
    file: *mut ffi::sqlite3_file,
    i_pg: c_int,
    pgsz: c_int,
    extend: c_int,
    pp: *mut *mut c_void,
) -> c_int {
    *pp = ptr::null_mut();
    let Some(inner) = handle(file) else {
        return ffi::SQLITE_MISUSE;
    };
    if i_pg < 0 || pgsz <= 0 {
        return ffi::SQLITE_IOERR_SHMMAP;
    }

    match inner.shm_map(i_pg as usize, pgsz as usize, extend != 0) {
        Ok(Some(region)) => {
            // The handle keeps the region alive until it unmaps
            *pp = region.as_ptr() as *mut c_void;
            ffi::SQLITE_OK
        }
        Ok(None) => ffi::SQLITE_OK,
        Err(e) => status::<()>(inner, Err(e)),
    }
}

unsafe extern "C" fn file_shm_lock(
    file: *mut ffi::sqlite3_file,
    offset: c_int,
    n: c_int,
    flags: c_int,
) -> c_int {
    let Some(inner) = handle(file) else {
        return ffi::SQLITE_MISUSE;
    };
    let result = ShmLockRequest::from_raw(offset, n, flags).and_then(|req| inner.shm_lock(req));
    status(inner, result)
}

unsafe extern "C" fn file_shm_barrier(file: *mut ffi::sqlite3_file) {
    if let Some(inner) = handle(file) {
        inner.shm_barrier();
    }
}

unsafe extern "C" fn file_shm_unmap(file: *mut ffi::sqlite3_file, delete: c_int) -> c_int {
    let Some(inner) = handle(file) else {
        return ffi::SQLITE_MISUSE;
    };
    let result = inner.shm_unmap(delete != 0);
    status(inner, result)
}
