//! Property-based tests for advisory lock correctness
//!
//! Uses proptest to drive random lock/unlock sequences from several
//! connections and checks the lock table invariants after every step.

use hostvfs::core::lock::{ConnId, FileLocks, LockError, LockLevel};
use proptest::prelude::*;

const CONNS: u64 = 4;

#[derive(Debug, Clone)]
enum Op {
    Acquire(u64, LockLevel),
    Release(u64, LockLevel),
}

fn level() -> impl Strategy<Value = LockLevel> {
    prop_oneof![
        Just(LockLevel::None),
        Just(LockLevel::Shared),
        Just(LockLevel::Reserved),
        Just(LockLevel::Pending),
        Just(LockLevel::Exclusive),
    ]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..CONNS, level()).prop_map(|(c, l)| Op::Acquire(c, l)),
        (0..CONNS, prop_oneof![Just(LockLevel::None), Just(LockLevel::Shared)])
            .prop_map(|(c, l)| Op::Release(c, l)),
    ]
}

fn levels(locks: &FileLocks) -> Vec<LockLevel> {
    (0..CONNS).map(|c| locks.level_of(ConnId(c))).collect()
}

proptest! {
    #[test]
    fn prop_single_writer_and_exclusive_alone(ops in prop::collection::vec(op(), 1..200)) {
        let mut locks = FileLocks::new();

        for op in ops {
            match op {
                Op::Acquire(c, l) => { let _ = locks.acquire(ConnId(c), l); }
                Op::Release(c, l) => {
                    prop_assert!(locks.release(ConnId(c), l).is_ok());
                }
            }

            let held = levels(&locks);
            let writers = held.iter().filter(|&&l| l >= LockLevel::Reserved).count();
            prop_assert!(writers <= 1, "more than one writer: {:?}", held);

            if held.contains(&LockLevel::Exclusive) {
                let holders = held.iter().filter(|&&l| l > LockLevel::None).count();
                prop_assert_eq!(holders, 1, "exclusive shared with others: {:?}", held);
            }
            prop_assert_eq!(locks.reserved(), writers == 1);
        }
    }

    #[test]
    fn prop_acquire_reports_held_level(ops in prop::collection::vec(op(), 1..200)) {
        let mut locks = FileLocks::new();

        for op in ops {
            if let Op::Acquire(c, l) = op {
                let conn = ConnId(c);
                let before = locks.level_of(conn);
                match locks.acquire(conn, l) {
                    Ok(held) => {
                        prop_assert_eq!(held, locks.level_of(conn));
                        prop_assert_eq!(held, before.max(l));
                    }
                    Err(LockError::Busy(conflict)) => {
                        prop_assert_eq!(conflict.held, locks.level_of(conn));
                        // Never lowered by a failed escalation
                        prop_assert!(conflict.held >= before);
                    }
                    Err(LockError::Misuse(_)) => {
                        prop_assert_eq!(before, locks.level_of(conn));
                    }
                }
            } else if let Op::Release(c, l) = op {
                locks.release(ConnId(c), l).unwrap();
            }
        }
    }

    #[test]
    fn prop_pending_keeps_new_readers_out(ops in prop::collection::vec(op(), 1..100)) {
        let mut locks = FileLocks::new();

        for op in ops {
            match op {
                Op::Acquire(c, l) => { let _ = locks.acquire(ConnId(c), l); }
                Op::Release(c, l) => { let _ = locks.release(ConnId(c), l); }
            }
        }

        let held = levels(&locks);
        let blocker = held.iter().position(|&l| l >= LockLevel::Pending);
        for c in 0..CONNS {
            if held[c as usize] != LockLevel::None {
                continue;
            }
            let result = locks.acquire(ConnId(c), LockLevel::Shared);
            prop_assert_eq!(result.is_ok(), blocker.is_none());
            if result.is_ok() {
                locks.release(ConnId(c), LockLevel::None).unwrap();
            }
        }
    }
}
