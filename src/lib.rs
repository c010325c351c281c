//! # propstore - An In-Memory Transient Property Store
//!
//! propstore maps arbitrary byte keys to fixed-width records of named,
//! independently lockable "properties" whose values are opaque byte
//! sequences. A client locks one or more properties, optionally reads their
//! current values, later writes new values (or just releases the locks)
//! under the same lock identity, and ultimately lets the record expire or
//! removes it explicitly.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           propstore                             │
//! │                                                                 │
//! │  ┌──────────────┐      ┌───────────────────────────────────┐    │
//! │  │ StoreRegistry│─────>│ TransientStore ("agents")         │    │
//! │  │  (by name)   │      │ TransientStore ("sessions")  ...  │    │
//! │  └──────┬───────┘      │                                   │    │
//! │         │              │  sharded map ─> KeyEntry (mutex)  │    │
//! │         │              │  lock-wait queue, timeout queue   │    │
//! │         │              └───────────────────────────────────┘    │
//! │         ▼                              ▲                        │
//! │  ┌──────────────────────────────┐      │                        │
//! │  │          Sweeper             │──────┘                        │
//! │  │   (background tokio task)    │  replay retries,              │
//! │  └──────────────────────────────┘  evict expired entries        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use propstore::{
//!     start_sweeper, LockMode, PropEntry, PropRequest, StoreConfig, StoreRegistry,
//!     TransientStore,
//! };
//! use bytes::Bytes;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = StoreRegistry::new();
//!     let store = TransientStore::new("sessions", 4, StoreConfig::default());
//!     registry.add("sessions", store.clone())?;
//!     let _sweeper = start_sweeper(registry.clone());
//!
//!     // Lock slot 0 for update; the grant reports the current value.
//!     let granted = store
//!         .get(Bytes::from("user:42"), vec![PropRequest::new(0, LockMode::Update)], 0, false)
//!         .await?;
//!     let lock_id = granted.props[0].lock_id;
//!
//!     // Store a value under that lock; the lock opens again.
//!     store
//!         .put(b"user:42", &[PropEntry::new(0, lock_id, Some(Bytes::from("online")))])
//!         .await;
//!     Ok(())
//! }
//! ```
//!
//! ## Semantics in brief
//!
//! - **Locks, not transactions.** Each property slot carries at most one
//!   lock: `Read` is shared (a later read grant replaces an earlier one),
//!   `Update` and `Create` are exclusive. Locks age out after the store's
//!   lock timeout and stop blocking, but the holder's id stays valid until
//!   the slot is cleared or re-granted.
//! - **Contention parks, it never spins.** A call that finds its slots
//!   locked and still has wait budget returns an unresolved future; the
//!   sweeper replays it on its ticks until it succeeds, the budget runs
//!   out, or `force` pushes it through.
//! - **Expiration is driven, not lazy.** Records live until the sweeper
//!   evicts them, one entry timeout after their last touch. `put` on a
//!   known key always restarts the timer, even if its slot updates fail.
//! - **Nothing is durable.** Dropping a store drops its contents.
//!
//! ## Module overview
//!
//! - [`store`]: the store, its records, and the lock state machine
//! - [`manager`]: the registry of open stores and the background sweeper
//! - [`config`]: validated store and sweeper configuration
//! - [`error`]: outcome codes and machinery errors
//! - [`hash`]: the content hash used for key placement

pub mod clock;
pub mod config;
pub mod error;
pub mod hash;
pub mod manager;
pub mod store;

// Re-export commonly used types for convenience
pub use config::{StoreConfig, SweeperConfig};
pub use error::{ConfigError, ErrorCode, StoreError};
pub use manager::{start_sweeper, StoreRegistry, Sweeper};
pub use store::{
    DeleteReply, LockMode, PropEntry, PropLock, PropReply, PropRequest, StoreStats,
    TransientStore,
};

/// Version of propstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
