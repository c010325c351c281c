//! Property slots and their locks.
//!
//! Each key maps to a fixed array of slots. A slot holds at most one value
//! and at most one lock; the lock is a plain value record, so granting and
//! inspecting locks never allocates.

use crate::error::ErrorCode;
use bytes::Bytes;

/// How a slot is (or is requested to be) locked.
///
/// `Read` is shared among readers; `Update` and `Create` are exclusive.
/// `Create` blocks exactly like `Update` but tells the grant not to report
/// the slot's current value back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LockMode {
    /// No lock held or requested.
    #[default]
    None,
    /// Exclusive; the grant suppresses the returned value.
    Create,
    /// Shared; a later read grant replaces an earlier one.
    Read,
    /// Exclusive.
    Update,
}

/// A granted lock: who holds it, how, and since when.
///
/// Equality is structural over all three fields. An expired lock no longer
/// blocks anyone, but its id survives until the slot is cleared so the
/// original holder's `put` can still match it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PropLock {
    /// Store-global acquisition id; must match on `put`.
    pub id: i32,
    /// Mode the lock was granted in. `None` means the slot is open.
    pub mode: LockMode,
    /// Tick at which the lock was granted.
    pub stamp: u64,
}

impl PropLock {
    pub fn new(id: i32, mode: LockMode, stamp: u64) -> Self {
        Self { id, mode, stamp }
    }

    /// Whether the lock is older than `span_ms` at tick `now`.
    #[inline]
    pub fn expired(&self, span_ms: u64, now: u64) -> bool {
        now.saturating_sub(self.stamp) > span_ms
    }
}

/// One slot in a key's record.
///
/// The value slot distinguishes three states: never written (`None`),
/// locked-but-never-written (`Some` of the empty sequence, installed by the
/// first grant), and holding data. The first two differ so that lock
/// identity survives until the first real write.
#[derive(Debug, Clone, Default)]
pub struct Prop {
    pub(crate) lock: PropLock,
    pub(crate) value: Option<Bytes>,
}

impl Prop {
    /// Whether the slot has been written or locked at least once.
    #[inline]
    pub(crate) fn is_assigned(&self) -> bool {
        self.value.is_some()
    }

    /// Whether this slot blocks a request for `requested`.
    ///
    /// Never-assigned slots do not block regardless of their lock record,
    /// and neither do open or expired locks. A read request is compatible
    /// with a held read lock: the grant will replace it.
    pub(crate) fn blocks(&self, requested: LockMode, lock_span_ms: u64, now: u64) -> bool {
        if self.value.is_none() || requested == LockMode::None {
            return false;
        }
        let held = self.lock;
        if held.mode == LockMode::None || held.expired(lock_span_ms, now) {
            return false;
        }
        !(requested == LockMode::Read && held.mode == LockMode::Read)
    }

    /// Applies one boundary record to this slot: store a value under a
    /// matching exclusive lock, or clear the lock without storing.
    /// A successful application always opens the lock.
    pub(crate) fn apply(&mut self, incoming: &PropEntry) -> ErrorCode {
        match &incoming.value {
            Some(value) => {
                if !self.is_assigned() || self.lock.mode == LockMode::None {
                    return ErrorCode::NotLocked;
                }
                if self.lock.id != incoming.lock_id {
                    return ErrorCode::LockIdMismatch;
                }
                if self.lock.mode == LockMode::Read {
                    return ErrorCode::InvalidLock;
                }
                self.value = Some(value.clone());
            }
            None => {
                // Clearing is allowed by the id holder, or by anyone while
                // the slot holds a read lock (read grants replace each
                // other, so the recorded id may belong to a later reader).
                if self.lock.id != incoming.lock_id && self.lock.mode != LockMode::Read {
                    return ErrorCode::LockIdMismatch;
                }
            }
        }
        self.lock.mode = LockMode::None;
        ErrorCode::None
    }
}

/// One requested slot in a `get` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropRequest {
    pub index: usize,
    pub mode: LockMode,
}

impl PropRequest {
    pub fn new(index: usize, mode: LockMode) -> Self {
        Self { index, mode }
    }
}

/// One slot crossing the store boundary.
///
/// Returned by `get` and `remove` with the lock id the caller must quote
/// back; supplied to `put`, where a `None` value clears the lock without
/// storing anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropEntry {
    pub index: usize,
    pub lock_id: i32,
    pub value: Option<Bytes>,
}

impl PropEntry {
    pub fn new(index: usize, lock_id: i32, value: Option<Bytes>) -> Self {
        Self {
            index,
            lock_id,
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPAN: u64 = 1_000;

    fn assigned(mode: LockMode, id: i32, stamp: u64) -> Prop {
        Prop {
            lock: PropLock::new(id, mode, stamp),
            value: Some(Bytes::from_static(b"v")),
        }
    }

    #[test]
    fn open_slots_admit_every_mode() {
        let prop = assigned(LockMode::None, 7, 0);
        for mode in [LockMode::Read, LockMode::Update, LockMode::Create] {
            assert!(!prop.blocks(mode, SPAN, 100));
        }
    }

    #[test]
    fn read_admits_read_but_blocks_exclusive_modes() {
        let prop = assigned(LockMode::Read, 1, 100);
        assert!(!prop.blocks(LockMode::Read, SPAN, 200));
        assert!(prop.blocks(LockMode::Update, SPAN, 200));
        assert!(prop.blocks(LockMode::Create, SPAN, 200));
    }

    #[test]
    fn exclusive_locks_block_everything() {
        for held in [LockMode::Update, LockMode::Create] {
            let prop = assigned(held, 1, 100);
            assert!(prop.blocks(LockMode::Read, SPAN, 200));
            assert!(prop.blocks(LockMode::Update, SPAN, 200));
            assert!(prop.blocks(LockMode::Create, SPAN, 200));
        }
    }

    #[test]
    fn unassigned_slots_never_block() {
        let prop = Prop {
            lock: PropLock::new(1, LockMode::Update, 100),
            value: None,
        };
        assert!(!prop.blocks(LockMode::Update, SPAN, 200));
    }

    #[test]
    fn requesting_no_lock_never_blocks() {
        let prop = assigned(LockMode::Update, 1, 100);
        assert!(!prop.blocks(LockMode::None, SPAN, 200));
    }

    #[test]
    fn expiry_is_strictly_after_the_span() {
        let lock = PropLock::new(1, LockMode::Update, 100);
        assert!(!lock.expired(SPAN, 100 + SPAN));
        assert!(lock.expired(SPAN, 100 + SPAN + 1));
    }

    #[test]
    fn expired_lock_stops_blocking_but_keeps_its_id() {
        let prop = assigned(LockMode::Update, 42, 100);
        let later = 100 + SPAN + 1;
        assert!(!prop.blocks(LockMode::Update, SPAN, later));
        assert_eq!(prop.lock.id, 42);
    }

    #[test]
    fn lock_equality_is_structural() {
        let a = PropLock::new(1, LockMode::Read, 5);
        assert_eq!(a, PropLock::new(1, LockMode::Read, 5));
        assert_ne!(a, PropLock::new(2, LockMode::Read, 5));
        assert_ne!(a, PropLock::new(1, LockMode::Update, 5));
        assert_ne!(a, PropLock::new(1, LockMode::Read, 6));
    }

    #[test]
    fn store_requires_assignment_lock_id_and_writable_mode() {
        let update = PropEntry::new(0, 1, Some(Bytes::from_static(b"new")));

        let mut never_written = Prop::default();
        assert_eq!(never_written.apply(&update), ErrorCode::NotLocked);

        let mut open = assigned(LockMode::None, 1, 0);
        assert_eq!(open.apply(&update), ErrorCode::NotLocked);

        let mut wrong_id = assigned(LockMode::Update, 2, 0);
        assert_eq!(wrong_id.apply(&update), ErrorCode::LockIdMismatch);

        let mut read_locked = assigned(LockMode::Read, 1, 0);
        assert_eq!(read_locked.apply(&update), ErrorCode::InvalidLock);

        let mut held = assigned(LockMode::Update, 1, 0);
        assert_eq!(held.apply(&update), ErrorCode::None);
        assert_eq!(held.value, Some(Bytes::from_static(b"new")));
        assert_eq!(held.lock.mode, LockMode::None);
        assert_eq!(held.lock.id, 1);
    }

    #[test]
    fn clear_needs_matching_id_unless_read_locked() {
        let clear = PropEntry::new(0, 9, None);

        let mut read_locked = assigned(LockMode::Read, 1, 0);
        assert_eq!(read_locked.apply(&clear), ErrorCode::None);
        assert_eq!(read_locked.lock.mode, LockMode::None);
        assert_eq!(read_locked.value, Some(Bytes::from_static(b"v")));

        let mut update_locked = assigned(LockMode::Update, 1, 0);
        assert_eq!(update_locked.apply(&clear), ErrorCode::LockIdMismatch);
        assert_eq!(update_locked.lock.mode, LockMode::Update);

        let mut own = assigned(LockMode::Update, 9, 0);
        assert_eq!(own.apply(&clear), ErrorCode::None);
        assert_eq!(own.lock.mode, LockMode::None);
    }
}
