#![no_main]
use hostvfs::{FileMethods, OpenFlags, ReadOutcome, Vfs};
use libfuzzer_sys::{arbitrary::Arbitrary, fuzz_target};

#[derive(Debug, Arbitrary)]
enum Op {
    Write { offset: u16, data: Vec<u8> },
    Read { offset: u16, len: u8 },
    Truncate { size: u16 },
}

// Reads always agree with a plain byte-vector model of the file
fuzz_target!(|ops: Vec<Op>| {
    let Ok(vfs) = Vfs::builder().name("fuzz-rw").build() else {
        return;
    };
    let flags = OpenFlags::READWRITE | OpenFlags::CREATE | OpenFlags::MAIN_DB;
    let Ok((mut file, _)) = vfs.open(Some("/fuzz.db"), flags) else {
        return;
    };
    let mut model: Vec<u8> = Vec::new();

    for op in ops.iter().take(64) {
        match op {
            Op::Write { offset, data } => {
                let offset = *offset as usize;
                file.write(offset as u64, data).unwrap();
                if model.len() < offset + data.len() {
                    model.resize(offset + data.len(), 0);
                }
                model[offset..offset + data.len()].copy_from_slice(data);
            }
            Op::Read { offset, len } => {
                let offset = *offset as usize;
                let mut buf = vec![0xEEu8; *len as usize];
                let outcome = file.read(offset as u64, &mut buf).unwrap();

                let available = model.len().saturating_sub(offset).min(buf.len());
                let expected_outcome = if available == buf.len() {
                    ReadOutcome::Complete
                } else {
                    ReadOutcome::Short { read: available }
                };
                assert_eq!(outcome, expected_outcome);
                assert_eq!(&buf[..available], &model[offset..offset + available]);
                assert!(buf[available..].iter().all(|&b| b == 0));
            }
            Op::Truncate { size } => {
                file.truncate(*size as u64).unwrap();
                model.resize(*size as usize, 0);
            }
        }
        assert_eq!(file.file_size().unwrap(), model.len() as u64);
    }

    file.close().unwrap();
});
