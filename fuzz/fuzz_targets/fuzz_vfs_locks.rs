#![no_main]
use hostvfs::{FileMethods, LockLevel, OpenFlags, Vfs, VfsError};
use libfuzzer_sys::{arbitrary::Arbitrary, fuzz_target};

#[derive(Debug, Arbitrary)]
struct Step {
    handle: u8,
    unlock: bool,
    level: u8,
}

fn level(raw: u8) -> LockLevel {
    match raw % 5 {
        0 => LockLevel::None,
        1 => LockLevel::Shared,
        2 => LockLevel::Reserved,
        3 => LockLevel::Pending,
        _ => LockLevel::Exclusive,
    }
}

// Lock traffic from several handles never yields two writers
fuzz_target!(|steps: Vec<Step>| {
    let Ok(vfs) = Vfs::builder().name("fuzz-locks").build() else {
        return;
    };
    let flags = OpenFlags::READWRITE | OpenFlags::CREATE | OpenFlags::MAIN_DB;
    let mut files: Vec<_> = (0..3)
        .filter_map(|_| vfs.open(Some("/locks.db"), flags).ok().map(|(f, _)| f))
        .collect();
    if files.len() != 3 {
        return;
    }

    for step in steps.iter().take(128) {
        let file = &mut files[step.handle as usize % 3];
        let lvl = level(step.level);
        let result = if step.unlock {
            file.unlock(lvl.min(LockLevel::Shared))
        } else {
            file.lock(lvl)
        };
        if let Err(e) = result {
            assert!(matches!(e, VfsError::Busy | VfsError::InvalidTransition(_)));
        }

        let mut writers = 0;
        let mut exclusive = 0;
        let mut holders = 0;
        for f in files.iter_mut() {
            let held = f.lock_level().unwrap();
            writers += (held >= LockLevel::Reserved) as usize;
            exclusive += (held == LockLevel::Exclusive) as usize;
            holders += (held > LockLevel::None) as usize;
        }
        assert!(writers <= 1);
        assert!(exclusive == 0 || holders == 1);
    }

    for mut f in files {
        f.close().unwrap();
    }
});
