//! Error taxonomy.
//!
//! Operation outcomes travel as an [`ErrorCode`] on the reply value; only
//! faults in the machinery itself (a parked request discarded by a store
//! clear, a registry name collision) surface as real `Err` values.

use std::time::Duration;
use thiserror::Error;

/// Outcome of a store operation.
///
/// The discriminants are wire-stable; reordering or renumbering them would
/// break any peer that has persisted or transmitted a code.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The operation succeeded.
    None = 0,
    /// Unclassified failure.
    General = 1,
    /// The key (or the registry entry) is not present.
    DoesNotExist = 2,
    /// The key (or the registry entry) is already present.
    AlreadyExists = 3,
    /// The store refused the operation for capacity reasons.
    CapacityExceeded = 4,
    /// The wait budget ran out before the contended locks cleared.
    LockWaitTimeOut = 5,
    /// A value update was attempted under a read lock.
    InvalidLock = 6,
    /// The supplied lock id does not match the lock currently held.
    LockIdMismatch = 7,
    /// Internal contention signal; parked requests carry it between retries
    /// and callers never observe it.
    Locked = 8,
    /// A value update was attempted on a slot that holds no lock.
    NotLocked = 9,
}

impl ErrorCode {
    /// The wire ordinal.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Whether this code reports success.
    pub fn is_ok(self) -> bool {
        self == ErrorCode::None
    }
}

/// Faults in the store machinery, as opposed to per-operation outcomes.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The request was parked for retry and the store was cleared or removed
    /// before a sweeper tick could resolve it.
    #[error("request was discarded while parked for retry")]
    Cancelled,

    /// A store with this name is already registered.
    #[error("a store named `{0}` is already registered")]
    DuplicateName(String),
}

/// Rejected configuration. The previous configuration stays in effect.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The entry timeout must be at least twice the lock timeout, otherwise
    /// an entry could expire while one of its locks is still live.
    #[error("entry timeout {timeout:?} must be at least twice the lock timeout {lock_timeout:?}")]
    TimeoutTooShort {
        timeout: Duration,
        lock_timeout: Duration,
    },

    /// The memory probe must run on a strictly longer cadence than the
    /// sweep tick.
    #[error("memory check period {memory_check_period:?} must exceed the check period {check_period:?}")]
    MemoryPeriodTooShort {
        memory_check_period: Duration,
        check_period: Duration,
    },
}
