//! Eviction of stale pool state and the background housekeeper.
//!
//! Eviction runs in two steps with no lock held across the whole map:
//!
//! ```text
//! find_stale()  walk the store, capture (name, handle) for every entry
//!               registered at or before now - max_age
//! evict()       for each candidate, remove the entry only if it still
//!               holds the captured handle; close the removed pool
//! ```
//!
//! A registration that lands between the two steps installs a new handle,
//! so the conditional remove misses and the fresher handle survives. Missed
//! candidates are simply looked at again on the next pass.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::config::RegistrySettings;
use crate::error::{ConnStateError, ConnStateResult};
use crate::manager::ConnectionStateManager;
use crate::pool::PooledConnectionHandle;
use crate::store::ConnectionStateStore;

const HOUSEKEEPER_THREAD_NAME: &str = "connstate-housekeeper";

/// A pool observed as stale by a scan, together with the exact handle seen.
#[derive(Clone, Debug)]
pub struct EvictionCandidate {
    pool_name: String,
    handle: Arc<PooledConnectionHandle>,
}

impl EvictionCandidate {
    pub fn pool_name(&self) -> &str {
        &self.pool_name
    }

    /// The handle the scan saw; removal only happens if it is still stored.
    pub fn handle(&self) -> &Arc<PooledConnectionHandle> {
        &self.handle
    }
}

/// Scan step: entries last registered at or before `now - max_age`.
pub(crate) fn find_stale(
    store: &ConnectionStateStore,
    now: SystemTime,
    max_age: Duration,
) -> Vec<EvictionCandidate> {
    let Some(cutoff) = now.checked_sub(max_age) else {
        return Vec::new();
    };
    store
        .handles()
        .into_iter()
        .filter(|handle| handle.last_registered_at() <= cutoff)
        .map(|handle| EvictionCandidate {
            pool_name: handle.pool_name().to_string(),
            handle,
        })
        .collect()
}

/// Removal step: conditionally remove each candidate. Returns the number
/// of pools actually removed and closed.
pub(crate) fn evict(store: &ConnectionStateStore, candidates: &[EvictionCandidate]) -> usize {
    let mut evicted = 0;
    for candidate in candidates {
        match store.remove_if_same(&candidate.pool_name, &candidate.handle) {
            Some(removed) => {
                removed.pool().close();
                evicted += 1;
                info!(pool = %candidate.pool_name, "removed and closed pool");
            }
            None => {
                debug!(
                    pool = %candidate.pool_name,
                    "pool re-registered since scan, eviction skipped"
                );
            }
        }
    }
    evicted
}

/// Where the housekeeping loop runs.
#[derive(Debug)]
enum Worker {
    /// A task on the caller's tokio runtime.
    Task(JoinHandle<()>),
    /// A dedicated thread owning a current-thread runtime.
    Thread(std::thread::JoinHandle<()>),
}

/// Background task that periodically purges stale pools from a manager.
///
/// Passes never overlap: the loop awaits each purge before the next tick,
/// and late ticks are delayed rather than bunched up.
#[derive(Debug)]
pub struct Housekeeper {
    shutdown_tx: watch::Sender<bool>,
    worker: Worker,
}

impl Housekeeper {
    /// Start housekeeping `manager` with `settings`.
    ///
    /// Runs on the current tokio runtime when called from inside one,
    /// otherwise on a dedicated thread. The loop ends when that runtime
    /// shuts down; use [`start_on_thread`](Self::start_on_thread) when the
    /// current runtime may not outlive the manager.
    pub fn start(
        manager: Arc<ConnectionStateManager>,
        settings: RegistrySettings,
    ) -> ConnStateResult<Self> {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let (shutdown_tx, shutdown_rx) = watch::channel(false);
                log_start(&settings);
                let task = handle.spawn(run_housekeeping_loop(manager, settings, shutdown_rx));
                Ok(Self {
                    shutdown_tx,
                    worker: Worker::Task(task),
                })
            }
            Err(_) => Self::start_on_thread(manager, settings),
        }
    }

    /// Start housekeeping on a dedicated thread that owns its own
    /// current-thread runtime, whatever runtime the caller is on.
    pub fn start_on_thread(
        manager: Arc<ConnectionStateManager>,
        settings: RegistrySettings,
    ) -> ConnStateResult<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        log_start(&settings);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(ConnStateError::Housekeeper)?;
        let thread = std::thread::Builder::new()
            .name(HOUSEKEEPER_THREAD_NAME.to_string())
            .spawn(move || {
                runtime.block_on(run_housekeeping_loop(manager, settings, shutdown_rx));
            })
            .map_err(ConnStateError::Housekeeper)?;

        Ok(Self {
            shutdown_tx,
            worker: Worker::Thread(thread),
        })
    }

    /// Stop sweeping. The registry keeps working; it just stops shrinking.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Worker::Task(handle) = &self.worker {
            handle.abort();
        }
        info!("connection state housekeeper stopped");
    }

    /// Whether the housekeeping loop has exited.
    pub fn is_finished(&self) -> bool {
        match &self.worker {
            Worker::Task(handle) => handle.is_finished(),
            Worker::Thread(thread) => thread.is_finished(),
        }
    }
}

impl Drop for Housekeeper {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

fn log_start(settings: &RegistrySettings) {
    info!(
        period = ?settings.tick_period(),
        eviction_duration = ?settings.eviction_duration,
        "connection state housekeeper starting"
    );
}

async fn run_housekeeping_loop(
    manager: Arc<ConnectionStateManager>,
    settings: RegistrySettings,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(settings.tick_period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!("housekeeping loop starting");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                manager.purge(settings.eviction_duration);
            }
            _ = shutdown.changed() => {
                debug!("housekeeping loop shutting down");
                break;
            }
        }
    }
}
