//! Connection state store — the concurrent pool-name → handle map.
//!
//! All writes are either "install a brand-new handle" or "remove the entry
//! if it still holds this exact handle". Nothing is mutated in place, so
//! callers need no locking beyond the map's own per-shard locks.

use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::pool::{ConnectionPool, CumulativeStats, InitialStats, PooledConnectionHandle};

/// What a registration did to the stored entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Registration {
    /// No entry existed for the name.
    Created,
    /// The entry wrapped the same physical pool; counters carried over.
    Refreshed,
    /// The entry wrapped a different physical pool; counters restarted.
    Replaced,
}

/// Concurrent map from pool name to the live handle for that name.
#[derive(Debug, Default)]
pub struct ConnectionStateStore {
    entries: DashMap<String, Arc<PooledConnectionHandle>>,
}

impl ConnectionStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new handle for `pool_name`, stamped `now`.
    ///
    /// Atomic per key: the counter hand-over decision and the insert happen
    /// under the same shard lock, so racing registrations for one name
    /// resolve to "last writer wins".
    pub fn upsert(
        &self,
        pool_name: &str,
        pool: Arc<dyn ConnectionPool>,
        initial: InitialStats,
        now: SystemTime,
    ) -> (Arc<PooledConnectionHandle>, Registration) {
        match self.entries.entry(pool_name.to_string()) {
            Entry::Occupied(mut entry) => {
                let (stats, outcome) = if entry.get().wraps(&pool) {
                    (entry.get().shared_stats(), Registration::Refreshed)
                } else {
                    (
                        Arc::new(CumulativeStats::from_initial(initial)),
                        Registration::Replaced,
                    )
                };
                let handle = Arc::new(PooledConnectionHandle::new(
                    pool_name.to_string(),
                    pool,
                    stats,
                    now,
                ));
                entry.insert(Arc::clone(&handle));
                (handle, outcome)
            }
            Entry::Vacant(entry) => {
                let handle = Arc::new(PooledConnectionHandle::new(
                    pool_name.to_string(),
                    pool,
                    Arc::new(CumulativeStats::from_initial(initial)),
                    now,
                ));
                entry.insert(Arc::clone(&handle));
                (handle, Registration::Created)
            }
        }
    }

    /// Re-register whatever physical pool `pool_name` currently holds.
    ///
    /// Installs a new handle around the same pool and counters, stamped
    /// `now`. Returns `None`, without inserting, if the name is absent.
    pub fn refresh(&self, pool_name: &str, now: SystemTime) -> Option<Arc<PooledConnectionHandle>> {
        let mut entry = self.entries.get_mut(pool_name)?;
        let handle = Arc::new(PooledConnectionHandle::new(
            pool_name.to_string(),
            Arc::clone(entry.pool()),
            entry.shared_stats(),
            now,
        ));
        *entry.value_mut() = Arc::clone(&handle);
        Some(handle)
    }

    pub fn get(&self, pool_name: &str) -> Option<Arc<PooledConnectionHandle>> {
        self.entries
            .get(pool_name)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove `pool_name` only if it still maps to exactly `expected`.
    ///
    /// Returns the removed handle, or `None` when the entry is gone or a
    /// newer handle has been installed since `expected` was read.
    pub fn remove_if_same(
        &self,
        pool_name: &str,
        expected: &Arc<PooledConnectionHandle>,
    ) -> Option<Arc<PooledConnectionHandle>> {
        self.entries
            .remove_if(pool_name, |_, current| Arc::ptr_eq(current, expected))
            .map(|(_, handle)| handle)
    }

    /// Remove `pool_name` whatever it currently holds.
    pub fn remove(&self, pool_name: &str) -> Option<Arc<PooledConnectionHandle>> {
        self.entries.remove(pool_name).map(|(_, handle)| handle)
    }

    /// Every live handle, read shard by shard.
    ///
    /// Not an atomic snapshot of the whole map: entries registered or
    /// removed during the walk may or may not be included.
    pub fn handles(&self) -> Vec<Arc<PooledConnectionHandle>> {
        self.entries
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Remove every entry, returning the removed handles.
    pub fn drain(&self) -> Vec<Arc<PooledConnectionHandle>> {
        let names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names
            .iter()
            .filter_map(|name| self.remove(name))
            .collect()
    }
}
