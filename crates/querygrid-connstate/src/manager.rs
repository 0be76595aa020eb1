//! Connection state manager — the process-wide registry of pooled connections.
//!
//! Workers look a pool up by name, build one on a miss, and re-register it
//! on every use. The housekeeper evicts pools nobody has re-registered
//! within the eviction duration. Monitoring reads snapshots and per-store
//! aggregates computed from the live map.

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use dashmap::DashMap;
use querygrid_core::{ConnectionKey, Identity};
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::config::RegistrySettings;
use crate::error::{ConnStateError, ConnStateResult};
use crate::eviction::{self, EvictionCandidate, Housekeeper};
use crate::metrics::PoolMetricsPublisher;
use crate::naming;
use crate::pool::{ConnectionPool, InitialStats, PooledConnectionHandle};
use crate::stats::{self, PoolSnapshot, StoreAggregate};
use crate::store::{ConnectionStateStore, Registration};

struct GlobalRegistry {
    manager: Arc<ConnectionStateManager>,
    // Held for the life of the process; dropping it would stop the loop.
    _housekeeper: Housekeeper,
}

static GLOBAL: OnceLock<GlobalRegistry> = OnceLock::new();

/// Registry of live connection pools keyed by pool name.
#[derive(Debug)]
pub struct ConnectionStateManager {
    clock: Arc<dyn Clock>,
    store: ConnectionStateStore,
    metrics: PoolMetricsPublisher,
    /// Serializes whole eviction passes against each other.
    eviction_lock: Mutex<()>,
    /// Per-name locks held by `acquire` while a missing pool is built.
    creation_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ConnectionStateManager {
    /// A registry with no housekeeper attached.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            store: ConnectionStateStore::new(),
            metrics: PoolMetricsPublisher::new(),
            eviction_lock: Mutex::new(()),
            creation_locks: DashMap::new(),
        }
    }

    /// The shared process-wide registry.
    ///
    /// Created on first use with the system clock, and its housekeeper is
    /// started at the same time on its own thread, so it keeps running
    /// whichever runtime the first caller was on. Eviction duration comes
    /// from the environment.
    ///
    /// # Panics
    ///
    /// Panics if the housekeeper cannot be started.
    pub fn global() -> Arc<Self> {
        let registry = GLOBAL.get_or_init(|| {
            let manager = Arc::new(Self::new(Arc::new(SystemClock)));
            let housekeeper = Housekeeper::start_on_thread(Arc::clone(&manager), RegistrySettings::from_env())
                .unwrap_or_else(|e| panic!("failed to start connection state housekeeper: {e}"));
            GlobalRegistry {
                manager,
                _housekeeper: housekeeper,
            }
        });
        Arc::clone(&registry.manager)
    }

    /// An isolated registry on `clock`, with no background work.
    ///
    /// Tests drive eviction explicitly through
    /// [`evict_state_older_than`](Self::evict_state_older_than) or by
    /// starting their own [`Housekeeper`].
    pub fn for_testing(clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self::new(clock))
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Name under which `identity`'s pool for `key` is registered.
    pub fn pool_name_for(&self, identity: &Identity, key: &ConnectionKey) -> String {
        naming::pool_name_for(identity, key)
    }

    /// Register `pool` under `pool_name`, stamped with the current time.
    ///
    /// Always installs a new handle, so an eviction pass that already
    /// captured the previous one will leave this entry alone. Re-registering
    /// the same physical pool keeps its counters and ignores `initial`.
    ///
    /// # Panics
    ///
    /// Panics if `pool_name` is empty.
    pub fn register_state(
        &self,
        pool_name: &str,
        pool: Arc<dyn ConnectionPool>,
        initial: InitialStats,
    ) -> Arc<PooledConnectionHandle> {
        assert!(!pool_name.is_empty(), "pool name must not be empty");

        let (handle, outcome) = self.store.upsert(pool_name, pool, initial, self.clock.now());
        match outcome {
            Registration::Created => debug!(pool = %pool_name, "pool state registered"),
            Registration::Refreshed => debug!(pool = %pool_name, "pool state refreshed"),
            Registration::Replaced => {
                info!(pool = %pool_name, "pool state replaced by a different pool")
            }
        }
        handle
    }

    /// The current handle for `pool_name`. Does not refresh it.
    pub fn get_state(&self, pool_name: &str) -> Option<Arc<PooledConnectionHandle>> {
        self.store.get(pool_name)
    }

    /// Number of registered pools.
    pub fn size(&self) -> usize {
        self.store.len()
    }

    /// Reuse `identity`'s pool for `key`, building it with `build` on a miss.
    ///
    /// A hit re-registers the existing pool. Either way the returned
    /// handle's request counter is incremented once. If `build` fails the
    /// registry is left unchanged.
    ///
    /// Builds for one pool name are serialized: callers missing at the same
    /// time wait for the first build and then reuse its pool. Hits and
    /// other names never wait.
    pub fn acquire<F, E>(
        &self,
        identity: &Identity,
        key: &ConnectionKey,
        build: F,
    ) -> ConnStateResult<Arc<PooledConnectionHandle>>
    where
        F: FnOnce() -> Result<Arc<dyn ConnectionPool>, E>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let pool_name = self.pool_name_for(identity, key);

        let handle = match self.store.refresh(&pool_name, self.clock.now()) {
            Some(handle) => {
                debug!(pool = %pool_name, "reusing pool");
                handle
            }
            None => {
                let result = self.build_once(&pool_name, identity, build);
                self.release_creation_lock(&pool_name);
                result?
            }
        };

        handle.record_connection_request();
        Ok(handle)
    }

    /// Miss path of `acquire`, run under the per-name creation lock.
    fn build_once<F, E>(
        &self,
        pool_name: &str,
        identity: &Identity,
        build: F,
    ) -> ConnStateResult<Arc<PooledConnectionHandle>>
    where
        F: FnOnce() -> Result<Arc<dyn ConnectionPool>, E>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let lock = Arc::clone(
            self.creation_locks
                .entry(pool_name.to_string())
                .or_default()
                .value(),
        );
        let _creating = lock.lock().unwrap_or_else(|e| e.into_inner());

        // Another caller may have built it while we waited.
        if let Some(handle) = self.store.refresh(pool_name, self.clock.now()) {
            debug!(pool = %pool_name, "reusing pool built concurrently");
            return Ok(handle);
        }

        info!(
            pool = %pool_name,
            user = %identity.name,
            "pool not found, creating one"
        );
        let pool = build().map_err(|e| ConnStateError::PoolBuild {
            pool_name: pool_name.to_string(),
            source: e.into(),
        })?;
        let handle = self.register_state(pool_name, pool, InitialStats::Empty);
        info!(pool = %pool_name, "pool created");
        Ok(handle)
    }

    /// Drop the creation lock for `pool_name` once no caller holds it.
    fn release_creation_lock(&self, pool_name: &str) {
        self.creation_locks
            .remove_if(pool_name, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Scan step: pools last registered at or before `now - duration`.
    ///
    /// Nothing is removed; hand the result to
    /// [`evict_candidates`](Self::evict_candidates).
    pub fn find_state_older_than(&self, duration: Duration) -> Vec<EvictionCandidate> {
        eviction::find_stale(&self.store, self.clock.now(), duration)
    }

    /// Removal step: remove each candidate whose entry still holds the
    /// handle the scan saw, closing its pool. Returns how many were removed.
    pub fn evict_candidates(&self, candidates: &[EvictionCandidate]) -> usize {
        eviction::evict(&self.store, candidates)
    }

    /// Evict every pool not re-registered within `duration`.
    ///
    /// Pools refreshed while the pass is running survive it.
    pub fn evict_state_older_than(&self, duration: Duration) -> usize {
        let _pass = self.eviction_lock.lock().unwrap_or_else(|e| e.into_inner());
        let candidates = self.find_state_older_than(duration);
        self.evict_candidates(&candidates)
    }

    /// One housekeeping pass: evict, then republish per-pool gauges.
    pub fn purge(&self, duration: Duration) -> usize {
        info!(
            pools = self.size(),
            max_age = ?duration,
            "connection pool housekeeping starting"
        );
        let evicted = self.evict_state_older_than(duration);
        self.metrics.publish(self.snapshots());
        info!(
            pools = self.size(),
            evicted,
            "connection pool housekeeping finished"
        );
        evicted
    }

    /// Snapshot of one pool, or `None` if it is not registered.
    pub fn find_by_pool_name(&self, pool_name: &str) -> Option<PoolSnapshot> {
        self.store.get(pool_name).map(|handle| PoolSnapshot::of(&handle))
    }

    /// Snapshot of every registered pool, ordered by pool name.
    pub fn snapshots(&self) -> Vec<PoolSnapshot> {
        let mut snapshots: Vec<PoolSnapshot> = self
            .store
            .handles()
            .iter()
            .map(|handle| PoolSnapshot::of(handle))
            .collect();
        snapshots.sort_by(|a, b| a.pool_name.cmp(&b.pool_name));
        snapshots
    }

    /// Snapshots of the pools registered for `user`.
    pub fn pools_for_principal(&self, user: &str) -> Vec<PoolSnapshot> {
        self.snapshots()
            .into_iter()
            .filter(|snapshot| snapshot.user == user)
            .collect()
    }

    /// Live gauges summed per store.
    pub fn aggregate_view(&self) -> Vec<StoreAggregate> {
        stats::aggregate(&self.store)
    }

    /// One pool's snapshot as JSON, or `None` if it is not registered.
    pub fn pool_statistics_json(&self, pool_name: &str) -> ConnStateResult<Option<String>> {
        self.find_by_pool_name(pool_name)
            .map(|snapshot| serde_json::to_string(&snapshot))
            .transpose()
            .map_err(ConnStateError::from)
    }

    /// Remove `pool_name` and close its pool. Returns whether it was registered.
    pub fn close_and_remove(&self, pool_name: &str) -> bool {
        match self.store.remove(pool_name) {
            Some(handle) => {
                handle.pool().close();
                info!(pool = %pool_name, "closed and removed pool");
                true
            }
            None => false,
        }
    }

    /// Close every registered pool and empty the registry.
    ///
    /// The registry stays usable; pools registered afterwards are kept.
    pub fn shutdown(&self) {
        let _pass = self.eviction_lock.lock().unwrap_or_else(|e| e.into_inner());
        let drained = self.store.drain();
        for handle in &drained {
            handle.pool().close();
        }
        self.metrics.publish(Vec::new());
        info!(closed = drained.len(), "connection state manager shut down");
    }

    /// Gauges published by the last housekeeping pass.
    pub fn metrics(&self) -> &PoolMetricsPublisher {
        &self.metrics
    }
}
