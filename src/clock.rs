//! Monotonic millisecond ticks.
//!
//! All lock and entry stamps are milliseconds elapsed since a process-wide
//! epoch taken on first use. A 64-bit tick cannot wrap within any realistic
//! process lifetime, so stamp arithmetic is plain subtraction.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Milliseconds elapsed since the process epoch.
#[inline]
pub fn now_ms() -> u64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
}

/// Milliseconds elapsed since an earlier tick.
#[inline]
pub fn elapsed_ms(since: u64) -> u64 {
    now_ms().saturating_sub(since)
}
