//! The periodic driver.
//!
//! One background task sweeps every registered store: parked retries are
//! replayed first (a freed lock should resolve its waiters before anything
//! expires), then the timeout queue is drained. On a longer cadence the
//! task probes aggregate memory usage against the configured budget and
//! maintains the registry's advisory flag.
//!
//! Ticks never overlap: a tick that would start while the previous one is
//! still running is skipped.

use crate::clock;
use crate::config::SweeperConfig;
use crate::manager::registry::StoreRegistry;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// A handle to the running sweeper.
///
/// Dropping the handle stops the background task.
#[derive(Debug)]
pub struct Sweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl Sweeper {
    /// Starts the sweeper over every store in `registry`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(registry: Arc<StoreRegistry>, config: SweeperConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(sweep_loop(registry, config, shutdown_rx));

        info!("store sweeper started");

        Self { shutdown_tx }
    }

    /// Stops the sweeper. Called automatically when the handle is dropped.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        info!("store sweeper stopped");
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweep_loop(
    registry: Arc<StoreRegistry>,
    config: SweeperConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticks = tokio::time::interval(config.check_period());
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_memory_check = clock::now_ms();

    loop {
        tokio::select! {
            _ = ticks.tick() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("sweeper received shutdown signal");
                    return;
                }
            }
        }

        for store in registry.stores() {
            store.process_lock_waits();
            store.process_timeouts();
        }

        let memory_period = config.memory_check_period().as_millis() as u64;
        if clock::elapsed_ms(last_memory_check) >= memory_period {
            last_memory_check = clock::now_ms();
            check_memory(&registry, &config);
        }
    }
}

/// Compares aggregate usage to the configured budget and maintains the
/// advisory flag. Without a budget the probe is a no-op.
fn check_memory(registry: &Arc<StoreRegistry>, config: &SweeperConfig) {
    let Some(budget) = config.memory_budget() else {
        return;
    };
    let usage: usize = registry
        .stores()
        .iter()
        .map(|store| store.memory_usage())
        .sum();
    let low = usage > budget;
    if low && !registry.memory_low() {
        warn!(usage, budget, "memory budget exceeded");
    }
    registry.set_memory_low(low);
}

/// Starts a sweeper with the default cadence.
///
/// Convenience wrapper for the common case.
pub fn start_sweeper(registry: Arc<StoreRegistry>) -> Sweeper {
    Sweeper::start(registry, SweeperConfig::default())
}
