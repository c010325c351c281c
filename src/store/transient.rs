//! The transient property store.
//!
//! A sharded map from key bytes to per-key records. Each record sits behind
//! its own mutex; the shard locks only guard the maps themselves and are
//! never held while waiting on a record, so a slow operation on one key
//! cannot stall unrelated keys in the same shard.
//!
//! Contended calls do not spin. An operation that finds its slots locked and
//! still has wait budget parks a retry record carrying its original
//! parameters and a completion handle; the sweeper replays the record on its
//! next tick, and the replay re-enters the operation from the top. The
//! caller just awaits the handle.
//!
//! Expiration is queue-driven: every create and every touch pushes a
//! `(record, stamp)` pair onto a FIFO, and the sweeper evicts a record only
//! when the head pair's stamp still matches the record's own. A record that
//! was touched again, deleted, or re-created under the same key bytes fails
//! that check, so stale pairs can never evict a live record.

use crate::clock;
use crate::config::StoreConfig;
use crate::error::{ConfigError, ErrorCode, StoreError};
use crate::hash::content_hash;
use crate::manager::registry::StoreRegistry;
use crate::store::entry::KeyEntry;
use crate::store::prop::{PropEntry, PropRequest};
use bytes::Bytes;
use std::collections::hash_map::Entry as MapEntry;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// Number of shards. More shards mean less map-lock contention at a fixed
/// memory overhead per store.
const NUM_SHARDS: usize = 64;

/// Rough per-record bookkeeping overhead used by the memory estimate.
const ENTRY_OVERHEAD: usize = 64;

type EntryRef = Arc<Mutex<KeyEntry>>;

struct Shard {
    entries: RwLock<HashMap<Bytes, EntryRef>>,
}

impl Shard {
    fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

/// One pending expiration. The weak reference may outlive the map entry;
/// reconciliation happens through the stamp, not through liveness.
struct TimeoutRecord {
    entry: Weak<Mutex<KeyEntry>>,
    stamp: u64,
}

/// Reply of `get` and `remove`: an outcome code plus the granted or emitted
/// slots. The slot list is empty unless the code reports success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropReply {
    pub status: ErrorCode,
    pub props: Vec<PropEntry>,
}

impl PropReply {
    fn empty(status: ErrorCode) -> Self {
        Self {
            status,
            props: Vec::new(),
        }
    }
}

/// Reply of `delete`: the outcome code plus whether the map removal itself
/// succeeded (it may not, if a sweep got there first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteReply {
    pub status: ErrorCode,
    pub deleted: bool,
}

/// A parked retry: the original parameters, the original start tick (the
/// wait budget decays across retries), and the caller's completion handle.
enum Waiter {
    Get {
        key: Bytes,
        requests: Vec<PropRequest>,
        max_wait_secs: u64,
        force: bool,
        started: u64,
        tx: oneshot::Sender<PropReply>,
    },
    Delete {
        key: Bytes,
        max_wait_secs: u64,
        force: bool,
        started: u64,
        tx: oneshot::Sender<DeleteReply>,
    },
    Remove {
        key: Bytes,
        max_wait_secs: u64,
        force: bool,
        started: u64,
        tx: oneshot::Sender<PropReply>,
    },
}

/// Outcome of one synchronous pass over an operation.
enum Attempt<T> {
    Done(T),
    Contended,
}

/// Decision for an operation that needs its locks clear.
enum Gate {
    Proceed,
    TimedOut,
    Park,
}

/// Point-in-time operation counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreStats {
    pub creates: u64,
    pub gets: u64,
    pub puts: u64,
    pub deletes: u64,
    pub removes: u64,
    /// Entries evicted by the timeout sweep.
    pub evicted: u64,
    /// Requests that parked at least once.
    pub parked: u64,
    /// Acquisitions and deletions that went through on `force`.
    pub forced: u64,
}

#[derive(Default)]
struct Counters {
    creates: AtomicU64,
    gets: AtomicU64,
    puts: AtomicU64,
    deletes: AtomicU64,
    removes: AtomicU64,
    evicted: AtomicU64,
    parked: AtomicU64,
    forced: AtomicU64,
}

/// An in-memory store of per-key property records with per-slot locking and
/// timed expiration.
///
/// The store is shared behind an `Arc`; every operation takes `&self`.
/// Nothing here is durable: dropping the store drops its contents.
pub struct TransientStore {
    name: String,
    prop_count: usize,
    shards: Vec<Shard>,
    limits: Mutex<StoreConfig>,
    lock_ids: AtomicI32,
    timeouts: Mutex<VecDeque<TimeoutRecord>>,
    waiters: Mutex<VecDeque<Waiter>>,
    registry: Mutex<Weak<StoreRegistry>>,
    counters: Counters,
}

impl std::fmt::Debug for TransientStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransientStore")
            .field("name", &self.name)
            .field("prop_count", &self.prop_count)
            .field("len", &self.len())
            .finish()
    }
}

impl TransientStore {
    /// Creates a store whose records each carry `prop_count` slots.
    pub fn new(name: impl Into<String>, prop_count: usize, config: StoreConfig) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            prop_count,
            shards: (0..NUM_SHARDS).map(|_| Shard::new()).collect(),
            limits: Mutex::new(config),
            lock_ids: AtomicI32::new(0),
            timeouts: Mutex::new(VecDeque::new()),
            waiters: Mutex::new(VecDeque::new()),
            registry: Mutex::new(Weak::new()),
            counters: Counters::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of slots in every record of this store.
    pub fn prop_count(&self) -> usize {
        self.prop_count
    }

    pub fn timeout(&self) -> Duration {
        self.limits.lock().unwrap().timeout()
    }

    pub fn lock_timeout(&self) -> Duration {
        self.limits.lock().unwrap().lock_timeout()
    }

    /// Replaces the entry timeout; a rejected change leaves the prior value
    /// in effect.
    pub fn set_timeout(&self, timeout: Duration) -> Result<(), ConfigError> {
        self.limits.lock().unwrap().set_timeout(timeout)
    }

    /// Replaces the lock timeout; a rejected change leaves the prior value
    /// in effect.
    pub fn set_lock_timeout(&self, lock_timeout: Duration) -> Result<(), ConfigError> {
        self.limits.lock().unwrap().set_lock_timeout(lock_timeout)
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout().as_millis() as u64
    }

    fn lock_timeout_ms(&self) -> u64 {
        self.lock_timeout().as_millis() as u64
    }

    /// Next acquisition id. The 32-bit space wraps in very long-lived
    /// stores; ids are identity tokens, not an ordering.
    fn next_lock_id(&self) -> i32 {
        self.lock_ids.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    fn shard(&self, key: &[u8]) -> &Shard {
        &self.shards[content_hash(key) as usize % NUM_SHARDS]
    }

    fn lookup(&self, key: &[u8]) -> Option<EntryRef> {
        self.shard(key).entries.read().unwrap().get(key).cloned()
    }

    /// Inserts a fresh record for `key` if none exists and starts its
    /// expiration timer.
    ///
    /// Returns whether the insert happened; an existing record is left
    /// untouched.
    pub fn create(&self, key: impl Into<Bytes>) -> bool {
        let key = key.into();
        let entry = {
            let mut entries = self.shard(&key).entries.write().unwrap();
            if entries.contains_key(&key) {
                return false;
            }
            let entry = Arc::new(Mutex::new(KeyEntry::new(
                key.clone(),
                self.prop_count,
                clock::now_ms(),
            )));
            entries.insert(key, Arc::clone(&entry));
            entry
        };
        self.counters.creates.fetch_add(1, Ordering::Relaxed);
        self.schedule_timeout(&entry);
        true
    }

    /// Reports whether `key` is present, along with whole seconds elapsed
    /// since its record was last touched. Absent keys report zero seconds.
    pub fn exists(&self, key: &[u8]) -> (bool, u64) {
        let Some(entry) = self.lookup(key) else {
            return (false, 0);
        };
        let guard = entry.lock().unwrap();
        if guard.is_deleted() {
            return (false, 0);
        }
        (true, clock::elapsed_ms(guard.stamp()) / 1_000)
    }

    /// Locks the requested slots and returns their contents.
    ///
    /// The record is created on first use. If any requested slot holds a
    /// live conflicting lock, the call parks and is retried on sweeper
    /// ticks until the locks clear or the wait budget (whole seconds,
    /// measured from this call) runs out; `max_wait_secs == 0` means no
    /// wait at all. On a spent budget, `force` takes the locks anyway,
    /// otherwise the reply carries [`ErrorCode::LockWaitTimeOut`].
    pub async fn get(
        &self,
        key: impl Into<Bytes>,
        requests: Vec<PropRequest>,
        max_wait_secs: u64,
        force: bool,
    ) -> Result<PropReply, StoreError> {
        let key = key.into();
        self.counters.gets.fetch_add(1, Ordering::Relaxed);
        let started = clock::now_ms();
        match self.try_get(&key, &requests, max_wait_secs, force, started) {
            Attempt::Done(reply) => Ok(reply),
            Attempt::Contended => {
                let (tx, rx) = oneshot::channel();
                self.park(Waiter::Get {
                    key,
                    requests,
                    max_wait_secs,
                    force,
                    started,
                    tx,
                });
                rx.await.map_err(|_| StoreError::Cancelled)
            }
        }
    }

    /// Stores or clears slots under locks previously granted by [`get`].
    ///
    /// Touching a known key always restarts its expiration timer, even when
    /// every slot update fails. A record with a value stores it (exclusive
    /// lock with matching id required); a record without one only clears
    /// the lock. The first failure aborts the batch; earlier records stay
    /// applied.
    ///
    /// [`get`]: TransientStore::get
    pub async fn put(&self, key: &[u8], updates: &[PropEntry]) -> ErrorCode {
        self.counters.puts.fetch_add(1, Ordering::Relaxed);
        let Some(entry) = self.lookup(key) else {
            return ErrorCode::DoesNotExist;
        };
        self.schedule_timeout(&entry);
        let mut guard = entry.lock().unwrap();
        if guard.is_deleted() {
            return ErrorCode::DoesNotExist;
        }
        guard.apply(updates)
    }

    /// Deletes `key` once no slot holds a live lock, with the same
    /// park-and-retry protocol as [`get`].
    ///
    /// `deleted` reports whether this call's map removal succeeded; a
    /// concurrent sweep may have removed the record first.
    ///
    /// [`get`]: TransientStore::get
    pub async fn delete(
        &self,
        key: impl Into<Bytes>,
        max_wait_secs: u64,
        force: bool,
    ) -> Result<DeleteReply, StoreError> {
        let key = key.into();
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        let started = clock::now_ms();
        match self.try_delete(&key, max_wait_secs, force, started) {
            Attempt::Done(reply) => Ok(reply),
            Attempt::Contended => {
                let (tx, rx) = oneshot::channel();
                self.park(Waiter::Delete {
                    key,
                    max_wait_secs,
                    force,
                    started,
                    tx,
                });
                rx.await.map_err(|_| StoreError::Cancelled)
            }
        }
    }

    /// Deletes `key` like [`delete`], additionally emitting every assigned
    /// slot as it was just before removal.
    ///
    /// Reports [`ErrorCode::DoesNotExist`] if the key is absent, or if the
    /// final map removal loses a race with a concurrent sweep.
    ///
    /// [`delete`]: TransientStore::delete
    pub async fn remove(
        &self,
        key: impl Into<Bytes>,
        max_wait_secs: u64,
        force: bool,
    ) -> Result<PropReply, StoreError> {
        let key = key.into();
        self.counters.removes.fetch_add(1, Ordering::Relaxed);
        let started = clock::now_ms();
        match self.try_remove(&key, max_wait_secs, force, started) {
            Attempt::Done(reply) => Ok(reply),
            Attempt::Contended => {
                let (tx, rx) = oneshot::channel();
                self.park(Waiter::Remove {
                    key,
                    max_wait_secs,
                    force,
                    started,
                    tx,
                });
                rx.await.map_err(|_| StoreError::Cancelled)
            }
        }
    }

    /// Drops every record and both queues, ignoring any held locks. Parked
    /// requests observe a cancelled completion handle.
    pub fn clear(&self) {
        for shard in &self.shards {
            let drained: Vec<EntryRef> = {
                let mut entries = shard.entries.write().unwrap();
                entries.drain().map(|(_, entry)| entry).collect()
            };
            for entry in drained {
                entry.lock().unwrap().set_deleted();
            }
        }
        self.timeouts.lock().unwrap().clear();
        // Dropping the waiters drops their senders; the parked callers see
        // a cancelled handle.
        self.waiters.lock().unwrap().clear();
        debug!(store = %self.name, "store cleared");
    }

    /// Unregisters this store from its registry, then clears it.
    pub fn remove_store(self: &Arc<Self>) {
        let registry = self.registry.lock().unwrap().upgrade();
        if let Some(registry) = registry {
            registry.remove(self);
        }
        self.clear();
    }

    pub(crate) fn attach_registry(&self, registry: &Arc<StoreRegistry>) {
        *self.registry.lock().unwrap() = Arc::downgrade(registry);
    }

    pub(crate) fn detach_registry(&self) {
        *self.registry.lock().unwrap() = Weak::new();
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.entries.read().unwrap().len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate bytes held by live records: key and value lengths plus a
    /// fixed per-record overhead.
    pub fn memory_usage(&self) -> usize {
        let mut total = 0;
        for shard in &self.shards {
            // Snapshot the refs first; record mutexes are never taken while
            // a shard lock is held.
            let snapshot: Vec<(usize, EntryRef)> = shard
                .entries
                .read()
                .unwrap()
                .iter()
                .map(|(key, entry)| (key.len(), Arc::clone(entry)))
                .collect();
            for (key_len, entry) in snapshot {
                let guard = entry.lock().unwrap();
                if guard.is_deleted() {
                    continue;
                }
                total += key_len + guard.value_bytes() + ENTRY_OVERHEAD;
            }
        }
        total
    }

    /// Snapshot of the operation counters.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            creates: self.counters.creates.load(Ordering::Relaxed),
            gets: self.counters.gets.load(Ordering::Relaxed),
            puts: self.counters.puts.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            removes: self.counters.removes.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
            parked: self.counters.parked.load(Ordering::Relaxed),
            forced: self.counters.forced.load(Ordering::Relaxed),
        }
    }

    // ------------------------------------------------------------------
    // Sweeper entry points
    // ------------------------------------------------------------------

    /// Replays every parked request once. A request that still sees
    /// contention parks again for the next tick. Only the sweeper calls
    /// this; retries never run on the thread that saw the contention.
    pub fn process_lock_waits(&self) {
        let drained: Vec<Waiter> = {
            let mut waiters = self.waiters.lock().unwrap();
            waiters.drain(..).collect()
        };
        if drained.is_empty() {
            return;
        }
        trace!(store = %self.name, waiters = drained.len(), "replaying parked requests");
        for waiter in drained {
            match waiter {
                Waiter::Get {
                    key,
                    requests,
                    max_wait_secs,
                    force,
                    started,
                    tx,
                } => match self.try_get(&key, &requests, max_wait_secs, force, started) {
                    Attempt::Done(reply) => {
                        let _ = tx.send(reply);
                    }
                    Attempt::Contended => self.waiters.lock().unwrap().push_back(Waiter::Get {
                        key,
                        requests,
                        max_wait_secs,
                        force,
                        started,
                        tx,
                    }),
                },
                Waiter::Delete {
                    key,
                    max_wait_secs,
                    force,
                    started,
                    tx,
                } => match self.try_delete(&key, max_wait_secs, force, started) {
                    Attempt::Done(reply) => {
                        let _ = tx.send(reply);
                    }
                    Attempt::Contended => self.waiters.lock().unwrap().push_back(Waiter::Delete {
                        key,
                        max_wait_secs,
                        force,
                        started,
                        tx,
                    }),
                },
                Waiter::Remove {
                    key,
                    max_wait_secs,
                    force,
                    started,
                    tx,
                } => match self.try_remove(&key, max_wait_secs, force, started) {
                    Attempt::Done(reply) => {
                        let _ = tx.send(reply);
                    }
                    Attempt::Contended => self.waiters.lock().unwrap().push_back(Waiter::Remove {
                        key,
                        max_wait_secs,
                        force,
                        started,
                        tx,
                    }),
                },
            }
        }
    }

    /// Evicts expired records from the head of the timeout queue.
    ///
    /// A queued record is authoritative only if the entry's stamp still
    /// equals the one captured at enqueue; touched, deleted, and re-created
    /// entries all fail that check and survive their stale records.
    /// Returns the number of entries evicted.
    pub fn process_timeouts(&self) -> usize {
        let timeout_ms = self.timeout_ms();
        let mut evicted = 0usize;
        loop {
            let record = {
                let mut timeouts = self.timeouts.lock().unwrap();
                match timeouts.pop_front() {
                    None => break,
                    Some(record) if clock::elapsed_ms(record.stamp) < timeout_ms => {
                        // Head not due yet; later records are newer still.
                        timeouts.push_front(record);
                        break;
                    }
                    Some(record) => record,
                }
            };
            let Some(entry) = record.entry.upgrade() else {
                continue;
            };
            let mut guard = entry.lock().unwrap();
            if guard.is_deleted() || guard.stamp() != record.stamp {
                continue;
            }
            let Some(key) = guard.key().cloned() else {
                continue;
            };
            if self.detach(&key, &entry) {
                evicted += 1;
            }
            guard.set_deleted();
        }
        if evicted > 0 {
            self.counters
                .evicted
                .fetch_add(evicted as u64, Ordering::Relaxed);
            debug!(store = %self.name, evicted, "expired entries evicted");
        }
        evicted
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn park(&self, waiter: Waiter) {
        self.counters.parked.fetch_add(1, Ordering::Relaxed);
        trace!(store = %self.name, "parking contended request for retry");
        self.waiters.lock().unwrap().push_back(waiter);
    }

    /// Stamps the entry and queues a fresh expiration record for it; the
    /// matching stamps make the new record the authoritative deadline.
    fn schedule_timeout(&self, entry: &EntryRef) {
        let now = clock::now_ms();
        {
            let mut guard = entry.lock().unwrap();
            if guard.is_deleted() {
                return;
            }
            guard.touch(now);
        }
        self.timeouts.lock().unwrap().push_back(TimeoutRecord {
            entry: Arc::downgrade(entry),
            stamp: now,
        });
    }

    fn entry_or_insert(&self, key: &Bytes) -> EntryRef {
        if let Some(entry) = self.lookup(key) {
            return entry;
        }
        let (entry, inserted) = {
            let mut entries = self.shard(key).entries.write().unwrap();
            match entries.entry(key.clone()) {
                MapEntry::Occupied(slot) => (Arc::clone(slot.get()), false),
                MapEntry::Vacant(slot) => {
                    let entry = Arc::new(Mutex::new(KeyEntry::new(
                        key.clone(),
                        self.prop_count,
                        clock::now_ms(),
                    )));
                    slot.insert(Arc::clone(&entry));
                    (entry, true)
                }
            }
        };
        if inserted {
            self.schedule_timeout(&entry);
        }
        entry
    }

    /// Removes `key` from the map only if its slot still holds exactly this
    /// record; a record re-created under the same bytes is left alone.
    fn detach(&self, key: &Bytes, entry: &EntryRef) -> bool {
        let mut entries = self.shard(key).entries.write().unwrap();
        if entries
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
        {
            entries.remove(key);
            true
        } else {
            false
        }
    }

    fn gate(&self, locked: usize, max_wait_secs: u64, force: bool, started: u64) -> Gate {
        if locked == 0 {
            return Gate::Proceed;
        }
        if max_wait_secs == 0 || clock::elapsed_ms(started) > max_wait_secs.saturating_mul(1_000) {
            if force {
                self.counters.forced.fetch_add(1, Ordering::Relaxed);
                return Gate::Proceed;
            }
            return Gate::TimedOut;
        }
        Gate::Park
    }

    fn try_get(
        &self,
        key: &Bytes,
        requests: &[PropRequest],
        max_wait_secs: u64,
        force: bool,
        started: u64,
    ) -> Attempt<PropReply> {
        loop {
            let entry = self.entry_or_insert(key);
            let mut guard = entry.lock().unwrap();
            if guard.is_deleted() {
                // Lost a race against eviction; take a fresh record.
                drop(guard);
                continue;
            }
            let lock_span = self.lock_timeout_ms();
            let now = clock::now_ms();
            let locked = guard.count_locked(requests, lock_span, now);
            return match self.gate(locked, max_wait_secs, force, started) {
                Gate::Proceed => {
                    let props = guard.lock_and_get(requests, self.next_lock_id(), now);
                    Attempt::Done(PropReply {
                        status: ErrorCode::None,
                        props,
                    })
                }
                Gate::TimedOut => Attempt::Done(PropReply::empty(ErrorCode::LockWaitTimeOut)),
                Gate::Park => Attempt::Contended,
            };
        }
    }

    fn try_delete(
        &self,
        key: &Bytes,
        max_wait_secs: u64,
        force: bool,
        started: u64,
    ) -> Attempt<DeleteReply> {
        let Some(entry) = self.lookup(key) else {
            return Attempt::Done(DeleteReply {
                status: ErrorCode::DoesNotExist,
                deleted: false,
            });
        };
        let mut guard = entry.lock().unwrap();
        if guard.is_deleted() {
            return Attempt::Done(DeleteReply {
                status: ErrorCode::DoesNotExist,
                deleted: false,
            });
        }
        let lock_span = self.lock_timeout_ms();
        let now = clock::now_ms();
        let locked = guard.count_all_locked(lock_span, now);
        match self.gate(locked, max_wait_secs, force, started) {
            Gate::Proceed => {
                guard.set_deleted();
                let deleted = self.detach(key, &entry);
                Attempt::Done(DeleteReply {
                    status: ErrorCode::None,
                    deleted,
                })
            }
            Gate::TimedOut => Attempt::Done(DeleteReply {
                status: ErrorCode::LockWaitTimeOut,
                deleted: false,
            }),
            Gate::Park => Attempt::Contended,
        }
    }

    fn try_remove(
        &self,
        key: &Bytes,
        max_wait_secs: u64,
        force: bool,
        started: u64,
    ) -> Attempt<PropReply> {
        let Some(entry) = self.lookup(key) else {
            return Attempt::Done(PropReply::empty(ErrorCode::DoesNotExist));
        };
        let mut guard = entry.lock().unwrap();
        if guard.is_deleted() {
            return Attempt::Done(PropReply::empty(ErrorCode::DoesNotExist));
        }
        let lock_span = self.lock_timeout_ms();
        let now = clock::now_ms();
        let locked = guard.count_all_locked(lock_span, now);
        match self.gate(locked, max_wait_secs, force, started) {
            Gate::Proceed => {
                let props = guard.assigned_props();
                guard.set_deleted();
                if self.detach(key, &entry) {
                    Attempt::Done(PropReply {
                        status: ErrorCode::None,
                        props,
                    })
                } else {
                    Attempt::Done(PropReply::empty(ErrorCode::DoesNotExist))
                }
            }
            Gate::TimedOut => Attempt::Done(PropReply::empty(ErrorCode::LockWaitTimeOut)),
            Gate::Park => Attempt::Contended,
        }
    }
}
