//! Pool snapshots and per-store aggregation.
//!
//! Everything here is computed fresh from the live store on each call.
//! Consistency is per entry: a pool registered or evicted while the walk is
//! in progress may or may not show up.

use std::collections::BTreeMap;
use std::time::UNIX_EPOCH;

use querygrid_core::DatabaseType;
use serde::{Deserialize, Serialize};

use crate::pool::{PoolGauges, PoolStatistics, PooledConnectionHandle};
use crate::store::ConnectionStateStore;

/// Point-in-time view of one pool. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSnapshot {
    pub pool_name: String,
    pub user: String,
    pub store_id: String,
    pub last_registered_at_millis: u64,
    /// Gauges read from the physical pool when the snapshot was taken.
    pub dynamic: PoolGauges,
    /// Cumulative counters.
    pub statistics: PoolStatistics,
}

impl PoolSnapshot {
    pub fn of(handle: &PooledConnectionHandle) -> Self {
        let descriptor = handle.descriptor();
        Self {
            pool_name: handle.pool_name().to_string(),
            user: descriptor.principal.clone(),
            store_id: descriptor.connection_key.store_id(),
            last_registered_at_millis: handle
                .last_registered_at()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            dynamic: handle.gauges(),
            statistics: handle.statistics(),
        }
    }
}

/// Sum of the live gauges of every pool targeting one store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreAggregate {
    pub store_id: String,
    pub database_type: DatabaseType,
    pub pool_count: usize,
    pub aggregated_pool_stats: PoolGauges,
}

/// Group live pools by store and sum their gauges.
///
/// Output is ordered by store identifier.
pub fn aggregate(store: &ConnectionStateStore) -> Vec<StoreAggregate> {
    let mut groups: BTreeMap<String, StoreAggregate> = BTreeMap::new();

    for handle in store.handles() {
        let key = &handle.descriptor().connection_key;
        let store_id = key.store_id();
        let group = groups
            .entry(store_id.clone())
            .or_insert_with(|| StoreAggregate {
                store_id,
                database_type: key.database_type,
                pool_count: 0,
                aggregated_pool_stats: PoolGauges::default(),
            });
        group.pool_count += 1;
        group.aggregated_pool_stats += handle.gauges();
    }

    groups.into_values().collect()
}
