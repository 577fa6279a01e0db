#![no_main]
use hostvfs::{FileMethods, OpenFlags, Vfs};
use libfuzzer_sys::fuzz_target;

// Arbitrary paths must either open cleanly or fail with an error, never panic
fuzz_target!(|path: &str| {
    let Ok(vfs) = Vfs::builder().name("fuzz-open").max_pathname(256).build() else {
        return;
    };

    let full = match vfs.full_pathname(path) {
        Ok(full) => full,
        Err(_) => return,
    };
    assert!(full.starts_with('/'));
    assert!(full.len() <= 256);

    let flags = OpenFlags::READWRITE | OpenFlags::CREATE | OpenFlags::MAIN_DB;
    if let Ok((mut file, out)) = vfs.open(Some(&full), flags) {
        assert_eq!(out, flags);
        let _ = file.write(0, path.as_bytes());
        assert!(file.close().is_ok());
    }
});
