//! Per-key records.
//!
//! A `KeyEntry` is the unit of mutual exclusion: the store wraps each one in
//! its own mutex, and every method here assumes the caller holds that mutex.
//! The struct itself carries no synchronization.

use crate::error::ErrorCode;
use crate::store::prop::{LockMode, Prop, PropEntry, PropLock, PropRequest};
use bytes::Bytes;

/// One key's record: the key bytes, a fixed array of slots, and the stamp of
/// the last touch. A record whose key has been taken away is a tombstone; it
/// accepts no further writes and must not stay reachable from the store map.
#[derive(Debug)]
pub struct KeyEntry {
    key: Option<Bytes>,
    props: Vec<Prop>,
    stamp: u64,
}

impl KeyEntry {
    pub(crate) fn new(key: Bytes, prop_count: usize, now: u64) -> Self {
        Self {
            key: Some(key),
            props: vec![Prop::default(); prop_count],
            stamp: now,
        }
    }

    pub(crate) fn key(&self) -> Option<&Bytes> {
        self.key.as_ref()
    }

    /// Tick of the last touch; expiration records are reconciled against it.
    pub(crate) fn stamp(&self) -> u64 {
        self.stamp
    }

    pub(crate) fn touch(&mut self, now: u64) {
        self.stamp = now;
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.key.is_none()
    }

    /// Logically removes the record. Idempotent.
    pub(crate) fn set_deleted(&mut self) {
        self.key = None;
    }

    /// Counts requested slots that currently block the request.
    pub(crate) fn count_locked(
        &self,
        requests: &[PropRequest],
        lock_span_ms: u64,
        now: u64,
    ) -> usize {
        requests
            .iter()
            .filter(|request| {
                self.props
                    .get(request.index)
                    .map_or(false, |prop| prop.blocks(request.mode, lock_span_ms, now))
            })
            .count()
    }

    /// Counts every slot holding a live lock, with no request filter.
    pub(crate) fn count_all_locked(&self, lock_span_ms: u64, now: u64) -> usize {
        self.props
            .iter()
            .filter(|prop| prop.blocks(LockMode::Update, lock_span_ms, now))
            .count()
    }

    /// Installs a fresh lock on each in-range requested slot and reports the
    /// slot's prior contents, in request order. Out-of-range indices are
    /// skipped. A create-mode grant suppresses the reported value; the first
    /// grant on a never-written slot marks it assigned with the empty
    /// placeholder.
    pub(crate) fn lock_and_get(
        &mut self,
        requests: &[PropRequest],
        lock_id: i32,
        now: u64,
    ) -> Vec<PropEntry> {
        let mut granted = Vec::with_capacity(requests.len());
        for request in requests {
            let Some(prop) = self.props.get_mut(request.index) else {
                continue;
            };
            let value = if request.mode == LockMode::Create {
                None
            } else {
                prop.value.clone()
            };
            prop.lock = PropLock::new(lock_id, request.mode, now);
            if prop.value.is_none() {
                prop.value = Some(Bytes::new());
            }
            granted.push(PropEntry::new(request.index, lock_id, value));
        }
        granted
    }

    /// Emits one record per assigned slot, index ascending, regardless of
    /// lock state.
    pub(crate) fn assigned_props(&self) -> Vec<PropEntry> {
        self.props
            .iter()
            .enumerate()
            .filter_map(|(index, prop)| {
                prop.value
                    .clone()
                    .map(|value| PropEntry::new(index, prop.lock.id, Some(value)))
            })
            .collect()
    }

    /// Applies a batch of boundary records. The first failing record aborts
    /// the batch and reports its code; records already applied stay applied.
    pub(crate) fn apply(&mut self, updates: &[PropEntry]) -> ErrorCode {
        for update in updates {
            let Some(prop) = self.props.get_mut(update.index) else {
                continue;
            };
            let code = prop.apply(update);
            if code != ErrorCode::None {
                return code;
            }
        }
        ErrorCode::None
    }

    /// Approximate bytes held by this record's values.
    pub(crate) fn value_bytes(&self) -> usize {
        self.props
            .iter()
            .filter_map(|prop| prop.value.as_ref().map(Bytes::len))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPAN: u64 = 1_000;

    fn entry(prop_count: usize) -> KeyEntry {
        KeyEntry::new(Bytes::from_static(b"k"), prop_count, 0)
    }

    #[test]
    fn fresh_entries_have_no_assigned_slots() {
        let entry = entry(3);
        assert!(entry.assigned_props().is_empty());
        assert_eq!(entry.count_all_locked(SPAN, 100), 0);
        assert!(!entry.is_deleted());
    }

    #[test]
    fn lock_and_get_skips_out_of_range_indices_and_keeps_order() {
        let mut entry = entry(2);
        let requests = [
            PropRequest::new(1, LockMode::Update),
            PropRequest::new(9, LockMode::Update),
            PropRequest::new(0, LockMode::Read),
        ];

        let granted = entry.lock_and_get(&requests, 5, 100);

        assert_eq!(granted.len(), 2);
        assert_eq!(granted[0].index, 1);
        assert_eq!(granted[1].index, 0);
        assert!(granted.iter().all(|g| g.lock_id == 5));
    }

    #[test]
    fn first_grant_reports_no_value_and_marks_the_slot_assigned() {
        let mut entry = entry(1);

        let granted = entry.lock_and_get(&[PropRequest::new(0, LockMode::Update)], 1, 100);
        assert_eq!(granted[0].value, None);

        // The slot is now assigned-empty and visible to a full read-out.
        let assigned = entry.assigned_props();
        assert_eq!(assigned.len(), 1);
        assert_eq!(assigned[0].value, Some(Bytes::new()));
        assert_eq!(assigned[0].lock_id, 1);
    }

    #[test]
    fn create_grant_suppresses_the_stored_value() {
        let mut entry = entry(1);
        entry.lock_and_get(&[PropRequest::new(0, LockMode::Update)], 1, 0);
        assert_eq!(
            entry.apply(&[PropEntry::new(0, 1, Some(Bytes::from_static(b"data")))]),
            ErrorCode::None
        );

        let granted = entry.lock_and_get(&[PropRequest::new(0, LockMode::Create)], 2, 10);
        assert_eq!(granted[0].value, None);

        // The stored value itself is untouched by the create grant.
        assert_eq!(
            entry.assigned_props()[0].value,
            Some(Bytes::from_static(b"data"))
        );
    }

    #[test]
    fn read_grant_reports_the_current_value() {
        let mut entry = entry(1);
        entry.lock_and_get(&[PropRequest::new(0, LockMode::Update)], 1, 0);
        entry.apply(&[PropEntry::new(0, 1, Some(Bytes::from_static(b"hi")))]);

        let granted = entry.lock_and_get(&[PropRequest::new(0, LockMode::Read)], 2, 10);
        assert_eq!(granted[0].value, Some(Bytes::from_static(b"hi")));
        assert_eq!(granted[0].lock_id, 2);
    }

    #[test]
    fn count_locked_honors_the_request_filter() {
        let mut entry = entry(3);
        entry.lock_and_get(&[PropRequest::new(0, LockMode::Update)], 1, 100);

        let contended = [PropRequest::new(0, LockMode::Update)];
        let free = [PropRequest::new(1, LockMode::Update)];
        assert_eq!(entry.count_locked(&contended, SPAN, 200), 1);
        assert_eq!(entry.count_locked(&free, SPAN, 200), 0);

        // Expired locks stop counting.
        assert_eq!(entry.count_locked(&contended, SPAN, 100 + SPAN + 1), 0);
    }

    #[test]
    fn count_all_locked_sees_read_and_update_locks() {
        let mut entry = entry(3);
        entry.lock_and_get(
            &[
                PropRequest::new(0, LockMode::Read),
                PropRequest::new(1, LockMode::Update),
            ],
            1,
            100,
        );
        assert_eq!(entry.count_all_locked(SPAN, 200), 2);
    }

    #[test]
    fn apply_aborts_on_first_failure_but_keeps_earlier_successes() {
        let mut entry = entry(2);
        entry.lock_and_get(
            &[
                PropRequest::new(0, LockMode::Update),
                PropRequest::new(1, LockMode::Update),
            ],
            1,
            0,
        );

        let code = entry.apply(&[
            PropEntry::new(0, 1, Some(Bytes::from_static(b"kept"))),
            PropEntry::new(1, 99, Some(Bytes::from_static(b"rejected"))),
        ]);
        assert_eq!(code, ErrorCode::LockIdMismatch);

        let assigned = entry.assigned_props();
        assert_eq!(assigned[0].value, Some(Bytes::from_static(b"kept")));
        assert_eq!(assigned[1].value, Some(Bytes::new()));
    }

    #[test]
    fn expired_but_unreplaced_lock_still_accepts_its_holder() {
        let mut entry = entry(1);
        entry.lock_and_get(&[PropRequest::new(0, LockMode::Update)], 7, 0);

        // Long past the lock span, but nobody replaced the lock.
        let code = entry.apply(&[PropEntry::new(0, 7, Some(Bytes::from_static(b"late")))]);
        assert_eq!(code, ErrorCode::None);
        assert_eq!(
            entry.assigned_props()[0].value,
            Some(Bytes::from_static(b"late"))
        );
    }

    #[test]
    fn read_replacement_hands_ownership_to_the_new_reader() {
        let mut entry = entry(1);
        entry.lock_and_get(&[PropRequest::new(0, LockMode::Update)], 1, 0);
        entry.apply(&[PropEntry::new(0, 1, Some(Bytes::from_static(b"v")))]);

        // A takes a read lock, then B's read grant replaces it.
        entry.lock_and_get(&[PropRequest::new(0, LockMode::Read)], 2, 10);
        let granted = entry.lock_and_get(&[PropRequest::new(0, LockMode::Read)], 3, 20);
        assert_eq!(granted[0].lock_id, 3);

        // A can still clear (the slot holds a read lock), but cannot store.
        assert_eq!(
            entry.apply(&[PropEntry::new(0, 2, Some(Bytes::from_static(b"x")))]),
            ErrorCode::LockIdMismatch
        );
        assert_eq!(entry.apply(&[PropEntry::new(0, 2, None)]), ErrorCode::None);
    }

    #[test]
    fn tombstoning_is_idempotent() {
        let mut entry = entry(1);
        entry.set_deleted();
        assert!(entry.is_deleted());
        entry.set_deleted();
        assert!(entry.is_deleted());
        assert_eq!(entry.key(), None);
    }

    #[test]
    fn touch_moves_the_stamp() {
        let mut entry = entry(1);
        assert_eq!(entry.stamp(), 0);
        entry.touch(500);
        assert_eq!(entry.stamp(), 500);
    }

    #[test]
    fn value_bytes_sums_assigned_slots() {
        let mut entry = entry(3);
        entry.lock_and_get(&[PropRequest::new(0, LockMode::Update)], 1, 0);
        entry.apply(&[PropEntry::new(0, 1, Some(Bytes::from_static(b"12345")))]);
        assert_eq!(entry.value_bytes(), 5);
    }
}
