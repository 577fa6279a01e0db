#![no_main]
use hostvfs::{register_vfs, MemoryBackend, Vfs};
use libfuzzer_sys::fuzz_target;
use rusqlite::{Connection, OpenFlags};
use std::sync::Once;

const VFS: &str = "fuzz-sql";
static REGISTER: Once = Once::new();

// Arbitrary SQL through the VFS must not crash the adapter
fuzz_target!(|sql: &str| {
    REGISTER.call_once(|| {
        let vfs = Vfs::builder()
            .name(VFS)
            .backend(MemoryBackend::new())
            .build()
            .unwrap();
        register_vfs(vfs).unwrap();
    });

    let Ok(conn) = Connection::open_with_flags_and_vfs(
        "fuzz.db",
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        VFS,
    ) else {
        return;
    };
    let _ = conn.execute_batch(sql);
});
