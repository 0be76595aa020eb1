//! Mock pool shared by the unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use querygrid_core::{ConnectionKey, DatabaseType};

use crate::pool::{ConnectionPool, PoolDescriptor, PoolGauges};

#[derive(Debug)]
pub(crate) struct MockPool {
    descriptor: PoolDescriptor,
    active: AtomicU64,
    idle: AtomicU64,
    awaiting: AtomicU64,
    closed: AtomicBool,
}

impl MockPool {
    pub(crate) fn new(principal: &str, key: ConnectionKey) -> Self {
        Self {
            descriptor: PoolDescriptor::new(principal, key),
            active: AtomicU64::new(0),
            idle: AtomicU64::new(0),
            awaiting: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn shared(principal: &str, key: ConnectionKey) -> Arc<dyn ConnectionPool> {
        Arc::new(Self::new(principal, key))
    }

    pub(crate) fn set_active(&self, n: u64) {
        self.active.store(n, Ordering::Relaxed);
    }

    pub(crate) fn set_idle(&self, n: u64) {
        self.idle.store(n, Ordering::Relaxed);
    }

    pub(crate) fn set_awaiting(&self, n: u64) {
        self.awaiting.store(n, Ordering::Relaxed);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

impl ConnectionPool for MockPool {
    fn gauges(&self) -> PoolGauges {
        let active = self.active.load(Ordering::Relaxed);
        let idle = self.idle.load(Ordering::Relaxed);
        PoolGauges {
            total_connections: active + idle,
            idle_connections: idle,
            active_connections: active,
            threads_awaiting_connection: self.awaiting.load(Ordering::Relaxed),
        }
    }

    fn descriptor(&self) -> &PoolDescriptor {
        &self.descriptor
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

pub(crate) fn sales_key() -> ConnectionKey {
    ConnectionKey::new(DatabaseType::Postgres, "db.local", 5432, "sales", "UserPassword")
}

pub(crate) fn orders_key() -> ConnectionKey {
    ConnectionKey::new(DatabaseType::MySQL, "orders.local", 3306, "orders", "UserPassword")
}
