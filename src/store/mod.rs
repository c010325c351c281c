//! The property store itself.
//!
//! A store maps arbitrary key bytes to fixed-width records of independently
//! lockable slots. Callers lock slots with [`TransientStore::get`], write or
//! release them with [`TransientStore::put`], and let records expire or
//! remove them explicitly.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       TransientStore                         │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐             │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ ...64   │  key bytes  │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │──────────┐  │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘          │  │
//! │                                                           ▼  │
//! │  ┌────────────────────┐      ┌──────────────────────────────┐│
//! │  │  lock-wait queue   │      │  KeyEntry (own mutex)        ││
//! │  │  (parked retries)  │      │  [Prop][Prop][Prop]...       ││
//! │  └────────────────────┘      └──────────────────────────────┘│
//! │  ┌────────────────────┐                                      │
//! │  │  timeout queue     │                                      │
//! │  │  (entry, stamp)    │                                      │
//! │  └────────────────────┘                                      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both queues are drained by the sweeper in [`crate::manager`].

mod entry;
pub mod prop;
pub mod transient;

pub use prop::{LockMode, PropEntry, PropLock, PropRequest};
pub use transient::{DeleteReply, PropReply, StoreStats, TransientStore};
