//! querygrid-connstate — connection-pool state registry for QueryGrid.
//!
//! Execution workers reuse physical database connection pools across
//! requests. This crate decides which pool a request reuses, how long an
//! idle pool is kept, and what pool health looks like right now.
//!
//! # Architecture
//!
//! ```text
//! Worker computes pool_name_for(identity, key)
//!   → ConnectionStateManager::get_state(name)
//!     → hit  → reuse the handle's pool, re-register to refresh it
//!     → miss → build a physical pool, register_state(name, pool, stats)
//!
//! Housekeeper (one background task)
//!   → purge(duration)
//!     → find_state_older_than()   scan without removing
//!     → evict_candidates()        remove only if the handle is unchanged
//!     → PoolMetricsPublisher      republish per-pool gauges
//!
//! Monitoring
//!   → find_by_pool_name() / aggregate_view() / render_prometheus()
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod eviction;
pub mod manager;
pub mod metrics;
pub mod naming;
pub mod pool;
pub mod stats;
pub mod store;

#[cfg(test)]
mod test_support;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RegistrySettings, resolve_eviction_duration};
pub use error::{ConnStateError, ConnStateResult};
pub use eviction::{EvictionCandidate, Housekeeper};
pub use manager::ConnectionStateManager;
pub use metrics::PoolMetricsPublisher;
pub use naming::pool_name_for;
pub use pool::{
    ConnectionPool, InitialStats, PoolDescriptor, PoolGauges, PoolStatistics,
    PooledConnectionHandle,
};
pub use stats::{PoolSnapshot, StoreAggregate};
pub use store::ConnectionStateStore;
