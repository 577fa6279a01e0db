//! Property-based tests for WAL-index shared memory
//!
//! Random slot-lock and map sequences from several connections; checks slot
//! exclusivity, all-or-nothing grants and dense region allocation.

use hostvfs::core::lock::ConnId;
use hostvfs::core::shm::{ShmFile, ShmLockMode, ShmLockRequest, SHM_NLOCK};
use hostvfs::VfsError;
use proptest::prelude::*;

const CONNS: u64 = 4;
const REGION: usize = 1024;

fn mode() -> impl Strategy<Value = ShmLockMode> {
    prop_oneof![Just(ShmLockMode::Shared), Just(ShmLockMode::Exclusive)]
}

fn request() -> impl Strategy<Value = (u64, ShmLockRequest)> {
    (0..CONNS, 0..SHM_NLOCK, 1..=3usize, mode(), any::<bool>()).prop_map(
        |(conn, offset, n, mode, unlock)| {
            let n = n.min(SHM_NLOCK - offset);
            let req = if unlock {
                ShmLockRequest::unlock(offset, n, mode)
            } else {
                ShmLockRequest::lock(offset, n, mode)
            };
            (conn, req)
        },
    )
}

/// (conn, slot, mode) triples currently held
fn holdings(shm: &ShmFile) -> Vec<(u64, usize, ShmLockMode)> {
    let mut out = Vec::new();
    for conn in 0..CONNS {
        for slot in 0..SHM_NLOCK {
            for mode in [ShmLockMode::Shared, ShmLockMode::Exclusive] {
                if shm.holds(ConnId(conn), slot, mode) {
                    out.push((conn, slot, mode));
                }
            }
        }
    }
    out
}

proptest! {
    #[test]
    fn prop_exclusive_slot_has_no_other_holders(
        reqs in prop::collection::vec(request(), 1..200)
    ) {
        let mut shm = ShmFile::new();

        for (conn, req) in reqs {
            let before = holdings(&shm);
            let result = shm.lock(ConnId(conn), req);

            if let Err(e) = &result {
                prop_assert!(matches!(e, VfsError::Busy));
                // Nothing changes on a refused request
                prop_assert_eq!(&before, &holdings(&shm));
            }

            for slot in 0..SHM_NLOCK {
                let exclusive: Vec<u64> = (0..CONNS)
                    .filter(|&c| shm.holds(ConnId(c), slot, ShmLockMode::Exclusive))
                    .collect();
                prop_assert!(exclusive.len() <= 1);

                if let Some(&owner) = exclusive.first() {
                    let others_shared = (0..CONNS)
                        .filter(|&c| c != owner)
                        .any(|c| shm.holds(ConnId(c), slot, ShmLockMode::Shared));
                    prop_assert!(!others_shared, "slot {} shared beside exclusive", slot);
                }
            }
        }
    }

    #[test]
    fn prop_unmap_releases_every_slot(
        reqs in prop::collection::vec(request(), 1..100),
        victim in 0..CONNS,
    ) {
        let mut shm = ShmFile::new();
        for (conn, req) in reqs {
            let _ = shm.lock(ConnId(conn), req);
        }

        shm.unmap(ConnId(victim), false);
        prop_assert!(holdings(&shm).iter().all(|&(c, _, _)| c != victim));
    }

    #[test]
    fn prop_regions_allocated_densely(
        maps in prop::collection::vec((0..CONNS, 0..6usize, any::<bool>()), 1..60)
    ) {
        let mut shm = ShmFile::new();

        for (conn, index, extend) in maps {
            let count = shm.region_count();
            let result = shm.map(ConnId(conn), index, REGION, extend);

            match result {
                Ok(Some(region)) => {
                    prop_assert!(index <= count);
                    prop_assert_eq!(region.index(), index);
                    prop_assert_eq!(region.len(), REGION);
                }
                Ok(None) => prop_assert!(!extend && index >= count),
                Err(_) => prop_assert!(extend && index > count),
            }
            prop_assert!(shm.region_count() <= count + 1);
        }
    }
}
