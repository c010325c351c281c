//! Process-level store registry.
//!
//! Stores are registered here by name so the sweeper can find them; the
//! registry also carries the advisory memory-low flag the memory probe
//! maintains. All mutations serialize under one mutex.

use crate::error::StoreError;
use crate::store::TransientStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Named collection of open stores.
#[derive(Debug)]
pub struct StoreRegistry {
    stores: Mutex<HashMap<String, Arc<TransientStore>>>,
    memory_low: AtomicBool,
}

impl StoreRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            stores: Mutex::new(HashMap::new()),
            memory_low: AtomicBool::new(false),
        })
    }

    /// Registers `store` under `name` and wires the store's back-reference
    /// so it can unregister itself later. A name collision is rejected and
    /// leaves both the registry and the store untouched.
    pub fn add(
        self: &Arc<Self>,
        name: impl Into<String>,
        store: Arc<TransientStore>,
    ) -> Result<(), StoreError> {
        let name = name.into();
        let mut stores = self.stores.lock().unwrap();
        if stores.contains_key(&name) {
            return Err(StoreError::DuplicateName(name));
        }
        store.attach_registry(self);
        debug!(store = %name, "store registered");
        stores.insert(name, store);
        Ok(())
    }

    /// Unregisters `store`, matching by identity rather than by name.
    pub fn remove(&self, store: &Arc<TransientStore>) {
        let mut stores = self.stores.lock().unwrap();
        stores.retain(|_, registered| !Arc::ptr_eq(registered, store));
        drop(stores);
        store.detach_registry();
    }

    /// Looks a store up by name.
    pub fn get(&self, name: &str) -> Option<Arc<TransientStore>> {
        self.stores.lock().unwrap().get(name).cloned()
    }

    /// Names of every registered store.
    pub fn list(&self) -> Vec<String> {
        self.stores.lock().unwrap().keys().cloned().collect()
    }

    /// Every registered store; the sweeper iterates this each tick.
    pub fn stores(&self) -> Vec<Arc<TransientStore>> {
        self.stores.lock().unwrap().values().cloned().collect()
    }

    /// Clears and unregisters every store. Parked requests in each store
    /// observe cancelled completion handles.
    pub fn close_all(&self) {
        let drained: Vec<Arc<TransientStore>> = {
            let mut stores = self.stores.lock().unwrap();
            stores.drain().map(|(_, store)| store).collect()
        };
        for store in &drained {
            store.detach_registry();
            store.clear();
        }
        info!(count = drained.len(), "all stores closed");
    }

    /// Whether the last memory probe found aggregate usage over budget.
    /// Advisory only; operations never consult it.
    pub fn memory_low(&self) -> bool {
        self.memory_low.load(Ordering::Relaxed)
    }

    pub(crate) fn set_memory_low(&self, low: bool) {
        self.memory_low.store(low, Ordering::Relaxed);
    }
}
