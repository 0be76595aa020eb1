//! Wrapped physical pools and the handles the registry stores for them.
//!
//! The registry never looks inside a physical pool. It reads the pool's live
//! gauges, asks what it connects to, and closes it on eviction. Connection
//! acquisition and authentication stay with the pool implementation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use querygrid_core::ConnectionKey;
use serde::{Deserialize, Serialize};

/// Who a physical pool connects as, and to what.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolDescriptor {
    pub principal: String,
    pub connection_key: ConnectionKey,
}

impl PoolDescriptor {
    pub fn new(principal: &str, connection_key: ConnectionKey) -> Self {
        Self {
            principal: principal.to_string(),
            connection_key,
        }
    }
}

/// Live, point-in-time occupancy of a physical pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolGauges {
    pub total_connections: u64,
    pub idle_connections: u64,
    pub active_connections: u64,
    pub threads_awaiting_connection: u64,
}

impl std::ops::AddAssign for PoolGauges {
    fn add_assign(&mut self, rhs: Self) {
        self.total_connections += rhs.total_connections;
        self.idle_connections += rhs.idle_connections;
        self.active_connections += rhs.active_connections;
        self.threads_awaiting_connection += rhs.threads_awaiting_connection;
    }
}

/// Cumulative, monotonically increasing counters of a physical pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatistics {
    pub requested_connections: u64,
}

/// Counters to start a registration with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InitialStats {
    /// Start from zero.
    #[default]
    Empty,
    /// Start from previously accumulated counters.
    Seeded(PoolStatistics),
}

/// A real, opaque connection pool (Hikari-style datasource, bb8, deadpool...).
///
/// Implementations must be cheap to query: `gauges` is called on every
/// snapshot and aggregation.
pub trait ConnectionPool: Send + Sync + std::fmt::Debug {
    /// Current occupancy.
    fn gauges(&self) -> PoolGauges;
    /// Connection metadata, used for grouping and per-user views.
    fn descriptor(&self) -> &PoolDescriptor;
    /// Release the physical connections. Called once, on eviction or teardown.
    fn close(&self);
}

/// Counters shared by every handle that wraps the same physical pool.
#[derive(Debug, Default)]
pub(crate) struct CumulativeStats {
    requested_connections: AtomicU64,
}

impl CumulativeStats {
    pub(crate) fn from_initial(initial: InitialStats) -> Self {
        let seed = match initial {
            InitialStats::Empty => PoolStatistics::default(),
            InitialStats::Seeded(stats) => stats,
        };
        Self {
            requested_connections: AtomicU64::new(seed.requested_connections),
        }
    }

    fn snapshot(&self) -> PoolStatistics {
        PoolStatistics {
            requested_connections: self.requested_connections.load(Ordering::Relaxed),
        }
    }
}

/// The registry's record of one physical pool.
///
/// Handles are immutable apart from their counters: a registration always
/// installs a new handle instead of updating the stored one, which is what
/// lets eviction detect a concurrent refresh by reference identity.
#[derive(Debug)]
pub struct PooledConnectionHandle {
    pool_name: String,
    pool: Arc<dyn ConnectionPool>,
    stats: Arc<CumulativeStats>,
    last_registered_at: SystemTime,
}

impl PooledConnectionHandle {
    pub(crate) fn new(
        pool_name: String,
        pool: Arc<dyn ConnectionPool>,
        stats: Arc<CumulativeStats>,
        last_registered_at: SystemTime,
    ) -> Self {
        Self {
            pool_name,
            pool,
            stats,
            last_registered_at,
        }
    }

    pub fn pool_name(&self) -> &str {
        &self.pool_name
    }

    /// The wrapped physical pool.
    pub fn pool(&self) -> &Arc<dyn ConnectionPool> {
        &self.pool
    }

    pub fn descriptor(&self) -> &PoolDescriptor {
        self.pool.descriptor()
    }

    /// Gauges read live from the physical pool.
    pub fn gauges(&self) -> PoolGauges {
        self.pool.gauges()
    }

    pub fn statistics(&self) -> PoolStatistics {
        self.stats.snapshot()
    }

    /// Count one connection request served through this pool.
    pub fn record_connection_request(&self) {
        self.stats
            .requested_connections
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_registered_at(&self) -> SystemTime {
        self.last_registered_at
    }

    /// Whether this handle wraps exactly `pool` (same physical object).
    pub fn wraps(&self, pool: &Arc<dyn ConnectionPool>) -> bool {
        Arc::ptr_eq(&self.pool, pool)
    }

    pub(crate) fn shared_stats(&self) -> Arc<CumulativeStats> {
        Arc::clone(&self.stats)
    }
}
