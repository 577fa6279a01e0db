//! Advisory file locking
//!
//! Five lock levels guard a database file:
//!
//! ```text
//! NONE -> SHARED -> RESERVED -> PENDING -> EXCLUSIVE
//! ```
//!
//! Any number of connections may hold SHARED. At most one may hold RESERVED
//! or higher. PENDING keeps new readers out while a writer waits for the
//! existing ones to drain; EXCLUSIVE is granted only once no other
//! connection holds any lock.
//!
//! [`FileLocks`] is the authoritative table for one file. It lives inside the
//! arbiter and is only mutated there.

use libsqlite3_sys as ffi;
use std::collections::HashMap;
use std::fmt;
use std::os::raw::c_int;

/// Identity of one open handle across the whole process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum LockLevel {
    #[default]
    None = 0,
    Shared = 1,
    Reserved = 2,
    Pending = 3,
    Exclusive = 4,
}

impl LockLevel {
    pub fn from_raw(raw: c_int) -> Option<Self> {
        match raw {
            ffi::SQLITE_LOCK_NONE => Some(LockLevel::None),
            ffi::SQLITE_LOCK_SHARED => Some(LockLevel::Shared),
            ffi::SQLITE_LOCK_RESERVED => Some(LockLevel::Reserved),
            ffi::SQLITE_LOCK_PENDING => Some(LockLevel::Pending),
            ffi::SQLITE_LOCK_EXCLUSIVE => Some(LockLevel::Exclusive),
            _ => None,
        }
    }

    pub fn as_raw(self) -> c_int {
        self as c_int
    }
}

/// A lock request that could not be granted right now
///
/// `held` is the level the connection holds afterwards. An EXCLUSIVE request
/// blocked by readers still leaves the requester at PENDING.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conflict {
    pub held: LockLevel,
}

/// Lock operation the table refuses outright
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Misuse(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    Busy(Conflict),
    Misuse(Misuse),
}

/// Lock holders for one file
#[derive(Debug, Default)]
pub struct FileLocks {
    holders: HashMap<ConnId, LockLevel>,
}

impl FileLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Level currently held by `conn`
    pub fn level_of(&self, conn: ConnId) -> LockLevel {
        self.holders.get(&conn).copied().unwrap_or_default()
    }

    /// Whether any connection holds RESERVED or higher
    pub fn reserved(&self) -> bool {
        self.holders.values().any(|&l| l >= LockLevel::Reserved)
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }

    /// Connections holding at least SHARED
    pub fn holder_count(&self) -> usize {
        self.holders.len()
    }

    fn others_at_least(&self, conn: ConnId, level: LockLevel) -> bool {
        self.holders
            .iter()
            .any(|(&c, &l)| c != conn && l >= level)
    }

    fn set(&mut self, conn: ConnId, level: LockLevel) {
        if level == LockLevel::None {
            self.holders.remove(&conn);
        } else {
            self.holders.insert(conn, level);
        }
    }

    /// Escalate `conn` to `requested`
    ///
    /// Requests at or below the held level succeed without change.
    pub fn acquire(&mut self, conn: ConnId, requested: LockLevel) -> Result<LockLevel, LockError> {
        let current = self.level_of(conn);
        if requested <= current {
            return Ok(current);
        }

        let busy = |held| Err(LockError::Busy(Conflict { held }));

        match requested {
            LockLevel::None => return Ok(current),
            LockLevel::Shared => {
                if self.others_at_least(conn, LockLevel::Pending) {
                    return busy(current);
                }
                self.set(conn, LockLevel::Shared);
            }
            LockLevel::Reserved => {
                if current != LockLevel::Shared {
                    return Err(misuse(current, requested));
                }
                if self.others_at_least(conn, LockLevel::Reserved) {
                    return busy(current);
                }
                self.set(conn, LockLevel::Reserved);
            }
            LockLevel::Pending | LockLevel::Exclusive => {
                if current == LockLevel::None {
                    return Err(misuse(current, requested));
                }
                if current < LockLevel::Pending {
                    if self.others_at_least(conn, LockLevel::Reserved) {
                        return busy(current);
                    }
                    self.set(conn, LockLevel::Pending);
                }
                if requested == LockLevel::Exclusive {
                    if self.others_at_least(conn, LockLevel::Shared) {
                        return busy(LockLevel::Pending);
                    }
                    self.set(conn, LockLevel::Exclusive);
                }
            }
        }

        Ok(requested)
    }

    /// Drop `conn` to SHARED or NONE
    ///
    /// Requests at or above the held level leave it unchanged.
    pub fn release(&mut self, conn: ConnId, level: LockLevel) -> Result<LockLevel, LockError> {
        if level > LockLevel::Shared {
            return Err(LockError::Misuse(Misuse(format!(
                "unlock may only target SHARED or NONE, not {:?}",
                level
            ))));
        }
        let current = self.level_of(conn);
        if level >= current {
            return Ok(current);
        }
        self.set(conn, level);
        Ok(level)
    }
}

fn misuse(from: LockLevel, to: LockLevel) -> LockError {
    LockError::Misuse(Misuse(format!("cannot go from {:?} to {:?}", from, to)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: ConnId = ConnId(1);
    const B: ConnId = ConnId(2);
    const C: ConnId = ConnId(3);

    fn busy(held: LockLevel) -> Result<LockLevel, LockError> {
        Err(LockError::Busy(Conflict { held }))
    }

    #[test]
    fn test_raw_levels() {
        for level in [
            LockLevel::None,
            LockLevel::Shared,
            LockLevel::Reserved,
            LockLevel::Pending,
            LockLevel::Exclusive,
        ] {
            assert_eq!(LockLevel::from_raw(level.as_raw()), Some(level));
        }
        assert_eq!(LockLevel::from_raw(9), None);
    }

    #[test]
    fn test_many_readers() {
        let mut locks = FileLocks::new();
        for conn in [A, B, C] {
            assert_eq!(locks.acquire(conn, LockLevel::Shared), Ok(LockLevel::Shared));
        }
        assert_eq!(locks.holder_count(), 3);
        assert!(!locks.reserved());
    }

    #[test]
    fn test_single_reserved() {
        let mut locks = FileLocks::new();
        locks.acquire(A, LockLevel::Shared).unwrap();
        locks.acquire(B, LockLevel::Shared).unwrap();

        assert_eq!(locks.acquire(A, LockLevel::Reserved), Ok(LockLevel::Reserved));
        assert_eq!(locks.acquire(B, LockLevel::Reserved), busy(LockLevel::Shared));
        assert!(locks.reserved());

        // Readers may still join while a writer is only reserved
        assert_eq!(locks.acquire(C, LockLevel::Shared), Ok(LockLevel::Shared));
    }

    #[test]
    fn test_exclusive_waits_at_pending_for_readers() {
        let mut locks = FileLocks::new();
        locks.acquire(A, LockLevel::Shared).unwrap();
        locks.acquire(B, LockLevel::Shared).unwrap();

        assert_eq!(locks.acquire(A, LockLevel::Exclusive), busy(LockLevel::Pending));
        assert_eq!(locks.level_of(A), LockLevel::Pending);

        // No new readers while a writer is pending
        assert_eq!(locks.acquire(C, LockLevel::Shared), busy(LockLevel::None));

        locks.release(B, LockLevel::None).unwrap();
        assert_eq!(locks.acquire(A, LockLevel::Exclusive), Ok(LockLevel::Exclusive));
    }

    #[test]
    fn test_exclusive_blocks_everyone() {
        let mut locks = FileLocks::new();
        locks.acquire(A, LockLevel::Shared).unwrap();
        locks.acquire(A, LockLevel::Reserved).unwrap();
        locks.acquire(A, LockLevel::Exclusive).unwrap();

        assert_eq!(locks.acquire(B, LockLevel::Shared), busy(LockLevel::None));

        assert_eq!(locks.release(A, LockLevel::Shared), Ok(LockLevel::Shared));
        assert_eq!(locks.acquire(B, LockLevel::Shared), Ok(LockLevel::Shared));
    }

    #[test]
    fn test_escalation_rules() {
        let mut locks = FileLocks::new();
        assert!(matches!(
            locks.acquire(A, LockLevel::Reserved),
            Err(LockError::Misuse(_))
        ));
        assert!(matches!(
            locks.acquire(A, LockLevel::Exclusive),
            Err(LockError::Misuse(_))
        ));

        locks.acquire(A, LockLevel::Shared).unwrap();
        locks.acquire(A, LockLevel::Reserved).unwrap();
        // Asking for less than held is a no-op
        assert_eq!(locks.acquire(A, LockLevel::Shared), Ok(LockLevel::Reserved));
    }

    #[test]
    fn test_release_rules() {
        let mut locks = FileLocks::new();
        locks.acquire(A, LockLevel::Shared).unwrap();
        assert!(matches!(
            locks.release(A, LockLevel::Reserved),
            Err(LockError::Misuse(_))
        ));
        assert_eq!(locks.release(A, LockLevel::Shared), Ok(LockLevel::Shared));
        assert_eq!(locks.release(A, LockLevel::None), Ok(LockLevel::None));
        assert!(locks.is_empty());
    }

    #[test]
    fn test_reserved_visible_to_all() {
        let mut locks = FileLocks::new();
        locks.acquire(A, LockLevel::Shared).unwrap();
        locks.acquire(A, LockLevel::Reserved).unwrap();
        assert!(locks.reserved());
        locks.release(A, LockLevel::None).unwrap();
        assert!(!locks.reserved());
    }
}
