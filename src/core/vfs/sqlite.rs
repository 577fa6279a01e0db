//! SQLite VFS registration
//!
//! Exposes a [`Vfs`] to the engine as a `sqlite3_vfs` so databases can be
//! opened through it by name (`file:app.db?vfs=hostvfs`).

use super::registry::Vfs;
use super::sqlite_io::{file_open, SqliteFile};
use crate::core::flags::AccessMode;
use crate::error::{Result, VfsError};
use libsqlite3_sys as ffi;
use parking_lot::{const_mutex, Mutex};
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Serializes find-then-register so concurrent registrations stay idempotent
static REGISTRY_LOCK: Mutex<()> = const_mutex(());

/// Data hung off `sqlite3_vfs::pAppData`
struct AppData {
    vfs: Arc<Vfs>,
    name: CString,
}

/// Register `vfs` with SQLite under its descriptor name
///
/// Registering a name that is already registered by this crate is a no-op
/// and returns `false`. A name held by some other VFS is an error.
pub fn register_vfs(vfs: Arc<Vfs>) -> Result<bool> {
    let name = CString::new(vfs.name())
        .map_err(|e| VfsError::Config(format!("invalid VFS name: {}", e)))?;
    let make_default = vfs.descriptor().make_default();
    let max_pathname = c_int::try_from(vfs.descriptor().max_pathname())
        .map_err(|_| VfsError::Config("max_pathname does not fit a C int".to_string()))?;

    let _guard = REGISTRY_LOCK.lock();

    unsafe {
        let existing = ffi::sqlite3_vfs_find(name.as_ptr());
        if !existing.is_null() {
            if is_ours(existing) {
                return Ok(false);
            }
            return Err(VfsError::Config(format!(
                "VFS name {:?} is taken by another implementation",
                vfs.name()
            )));
        }
    }

    let app = Box::into_raw(Box::new(AppData { vfs, name }));

    let sqlite_vfs = Box::new(ffi::sqlite3_vfs {
        iVersion: 2,
        szOsFile: std::mem::size_of::<SqliteFile>() as c_int,
        mxPathname: max_pathname,
        pNext: ptr::null_mut(),
        zName: unsafe { (*app).name.as_ptr() },
        pAppData: app as *mut c_void,
        xOpen: Some(vfs_open),
        xDelete: Some(vfs_delete),
        xAccess: Some(vfs_access),
        xFullPathname: Some(vfs_full_pathname),
        xDlOpen: Some(vfs_dl_open),
        xDlError: Some(vfs_dl_error),
        xDlSym: Some(vfs_dl_sym),
        xDlClose: Some(vfs_dl_close),
        xRandomness: Some(vfs_randomness),
        xSleep: Some(vfs_sleep),
        xCurrentTime: Some(vfs_current_time),
        xGetLastError: Some(vfs_get_last_error),
        xCurrentTimeInt64: Some(vfs_current_time_int64),
        xSetSystemCall: None,
        xGetSystemCall: None,
        xNextSystemCall: None,
    });

    let vfs_ptr = Box::into_raw(sqlite_vfs);

    unsafe {
        let rc = ffi::sqlite3_vfs_register(vfs_ptr, make_default as c_int);
        if rc != ffi::SQLITE_OK {
            drop(Box::from_raw(vfs_ptr));
            drop(Box::from_raw(app));
            return Err(VfsError::RegistrationFailed(rc));
        }
        info!(vfs = ?(*app).name, make_default, "VFS registered");
    }

    Ok(true)
}

/// Unregister the VFS called `name`
///
/// Unknown names are ignored. No connection may still be using the VFS.
pub fn unregister_vfs(name: &str) -> Result<()> {
    let c_name = CString::new(name)
        .map_err(|e| VfsError::Config(format!("invalid VFS name: {}", e)))?;

    let _guard = REGISTRY_LOCK.lock();

    unsafe {
        let vfs_ptr = ffi::sqlite3_vfs_find(c_name.as_ptr());
        if vfs_ptr.is_null() {
            return Ok(());
        }
        if !is_ours(vfs_ptr) {
            return Err(VfsError::Config(format!(
                "VFS {:?} was not registered by this crate",
                name
            )));
        }

        let rc = ffi::sqlite3_vfs_unregister(vfs_ptr);
        if rc != ffi::SQLITE_OK {
            return Err(VfsError::RegistrationFailed(rc));
        }

        let app_data = (*vfs_ptr).pAppData;
        if !app_data.is_null() {
            drop(Box::from_raw(app_data as *mut AppData));
        }
        drop(Box::from_raw(vfs_ptr));
    }

    info!(vfs = name, "VFS unregistered");
    Ok(())
}

/// Whether `name` is currently registered with SQLite
pub fn is_registered(name: &str) -> bool {
    let Ok(c_name) = CString::new(name) else {
        return false;
    };
    unsafe { !ffi::sqlite3_vfs_find(c_name.as_ptr()).is_null() }
}

unsafe fn is_ours(vfs: *mut ffi::sqlite3_vfs) -> bool {
    (*vfs).xOpen.map(|f| f as usize) == Some(vfs_open as usize)
}

pub(super) unsafe fn vfs_of<'a>(vfs: *mut ffi::sqlite3_vfs) -> Option<&'a Arc<Vfs>> {
    let app = (*vfs).pAppData as *const AppData;
    if app.is_null() {
        return None;
    }
    Some(&(*app).vfs)
}

unsafe fn path_arg<'a>(z_name: *const c_char) -> Option<&'a str> {
    if z_name.is_null() {
        return None;
    }
    CStr::from_ptr(z_name).to_str().ok()
}

/// Copy `s` into a C buffer of `n` bytes, truncating and NUL-terminating
unsafe fn copy_out(s: &str, n: c_int, out: *mut c_char) {
    if n <= 0 || out.is_null() {
        return;
    }
    let len = s.len().min(n as usize - 1);
    ptr::copy_nonoverlapping(s.as_ptr() as *const c_char, out, len);
    *out.add(len) = 0;
}

unsafe extern "C" fn vfs_open(
    vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    file: *mut ffi::sqlite3_file,
    flags: c_int,
    p_out_flags: *mut c_int,
) -> c_int {
    file_open(vfs, z_name, file, flags, p_out_flags)
}

unsafe extern "C" fn vfs_delete(
    vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    sync_dir: c_int,
) -> c_int {
    let Some(vfs) = vfs_of(vfs) else {
        return ffi::SQLITE_ERROR;
    };
    let Some(path) = path_arg(z_name) else {
        return ffi::SQLITE_IOERR_DELETE;
    };

    match vfs.delete(path, sync_dir != 0) {
        Ok(()) => ffi::SQLITE_OK,
        Err(e) => {
            vfs.record_error(&e);
            e.code()
        }
    }
}

unsafe extern "C" fn vfs_access(
    vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    flags: c_int,
    p_res_out: *mut c_int,
) -> c_int {
    *p_res_out = 0;
    let Some(vfs) = vfs_of(vfs) else {
        return ffi::SQLITE_ERROR;
    };
    let (Some(path), Some(mode)) = (path_arg(z_name), AccessMode::from_raw(flags)) else {
        return ffi::SQLITE_IOERR_ACCESS;
    };

    match vfs.access(path, mode) {
        Ok(ok) => {
            *p_res_out = ok as c_int;
            ffi::SQLITE_OK
        }
        Err(e) => {
            vfs.record_error(&e);
            e.code()
        }
    }
}

unsafe extern "C" fn vfs_full_pathname(
    vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    n_out: c_int,
    z_out: *mut c_char,
) -> c_int {
    let Some(vfs) = vfs_of(vfs) else {
        return ffi::SQLITE_ERROR;
    };
    let Some(path) = path_arg(z_name) else {
        return ffi::SQLITE_CANTOPEN;
    };

    let full = match vfs.full_pathname(path) {
        Ok(full) => full,
        Err(e) => {
            vfs.record_error(&e);
            return e.code();
        }
    };
    // Room for the terminator
    if full.len() >= n_out.max(0) as usize {
        let e = VfsError::TooBig {
            len: full.len(),
            max: n_out.max(1) as usize - 1,
        };
        vfs.record_error(&e);
        return e.code();
    }

    copy_out(&full, n_out, z_out);
    ffi::SQLITE_OK
}

unsafe extern "C" fn vfs_dl_open(vfs: *mut ffi::sqlite3_vfs, z_name: *const c_char) -> *mut c_void {
    if let Some(vfs) = vfs_of(vfs) {
        if let Err(e) = vfs.dl_open(path_arg(z_name).unwrap_or("")) {
            vfs.record_error(&e);
        }
    }
    ptr::null_mut()
}

/// Symbol lookup always fails; no library is ever loaded
unsafe extern "C" fn vfs_dl_sym(
    _vfs: *mut ffi::sqlite3_vfs,
    _handle: *mut c_void,
    _symbol: *const c_char,
) -> Option<unsafe extern "C" fn(*mut ffi::sqlite3_vfs, *mut c_void, *const c_char)> {
    None
}

unsafe extern "C" fn vfs_dl_error(vfs: *mut ffi::sqlite3_vfs, n_byte: c_int, z_err_msg: *mut c_char) {
    let msg = vfs_of(vfs).map_or(super::registry::DL_ERROR_MESSAGE, |v| v.dl_error());
    copy_out(msg, n_byte, z_err_msg);
}

unsafe extern "C" fn vfs_dl_close(_vfs: *mut ffi::sqlite3_vfs, _handle: *mut c_void) {}

unsafe extern "C" fn vfs_randomness(
    vfs: *mut ffi::sqlite3_vfs,
    n_byte: c_int,
    z_out: *mut c_char,
) -> c_int {
    if n_byte <= 0 || z_out.is_null() {
        return 0;
    }
    let Some(vfs) = vfs_of(vfs) else {
        return 0;
    };
    let buf = std::slice::from_raw_parts_mut(z_out as *mut u8, n_byte as usize);
    vfs.randomness(buf);
    n_byte
}

unsafe extern "C" fn vfs_sleep(vfs: *mut ffi::sqlite3_vfs, microseconds: c_int) -> c_int {
    let Some(vfs) = vfs_of(vfs) else {
        return 0;
    };
    let slept = vfs.sleep(Duration::from_micros(microseconds.max(0) as u64));
    slept.as_micros().min(c_int::MAX as u128) as c_int
}

unsafe extern "C" fn vfs_current_time(vfs: *mut ffi::sqlite3_vfs, p_time_out: *mut f64) -> c_int {
    let Some(vfs) = vfs_of(vfs) else {
        return ffi::SQLITE_ERROR;
    };
    *p_time_out = vfs.current_time();
    ffi::SQLITE_OK
}

unsafe extern "C" fn vfs_current_time_int64(
    vfs: *mut ffi::sqlite3_vfs,
    p_time_out: *mut ffi::sqlite3_int64,
) -> c_int {
    let Some(vfs) = vfs_of(vfs) else {
        return ffi::SQLITE_ERROR;
    };
    *p_time_out = vfs.current_time_int64();
    ffi::SQLITE_OK
}

unsafe extern "C" fn vfs_get_last_error(
    vfs: *mut ffi::sqlite3_vfs,
    n_byte: c_int,
    z_err_msg: *mut c_char,
) -> c_int {
    let Some(vfs) = vfs_of(vfs) else {
        return 0;
    };
    match vfs.last_error() {
        Some((code, msg)) => {
            copy_out(&msg, n_byte, z_err_msg);
            code
        }
        None => {
            copy_out("", n_byte, z_err_msg);
            0
        }
    }
}

