//! Connection state registry end-to-end tests.
//!
//! Drives `ConnectionStateManager` through its public API with a manual
//! clock and an in-memory pool, covering the register → refresh → evict
//! lifecycle, concurrent refresh/eviction, and the monitoring views.
//!
//! The test stack: `ConnectionStateManager` → `ConnectionStateStore` → `FakePool`

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use querygrid_connstate::{
    ConnectionPool, ConnectionStateManager, Housekeeper, InitialStats, ManualClock,
    PoolDescriptor, PoolGauges, RegistrySettings,
};
use querygrid_core::{ConnectionKey, DatabaseType, Identity};

const FIVE_MINUTES: Duration = Duration::from_secs(300);

// ── FakePool ────────────────────────────────────────────────────────

/// An in-memory pool with settable gauges that records whether it was closed.
#[derive(Debug)]
struct FakePool {
    descriptor: PoolDescriptor,
    active: AtomicU64,
    idle: AtomicU64,
    closed: AtomicBool,
}

impl FakePool {
    fn new(principal: &str, key: ConnectionKey) -> Arc<Self> {
        Arc::new(Self {
            descriptor: PoolDescriptor::new(principal, key),
            active: AtomicU64::new(0),
            idle: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    fn with_gauges(principal: &str, key: ConnectionKey, active: u64, idle: u64) -> Arc<Self> {
        let pool = Self::new(principal, key);
        pool.active.store(active, Ordering::SeqCst);
        pool.idle.store(idle, Ordering::SeqCst);
        pool
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ConnectionPool for FakePool {
    fn gauges(&self) -> PoolGauges {
        let active = self.active.load(Ordering::SeqCst);
        let idle = self.idle.load(Ordering::SeqCst);
        PoolGauges {
            total_connections: active + idle,
            idle_connections: idle,
            active_connections: active,
            threads_awaiting_connection: 0,
        }
    }

    fn descriptor(&self) -> &PoolDescriptor {
        &self.descriptor
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn warehouse_key() -> ConnectionKey {
    ConnectionKey::new(DatabaseType::Snowflake, "acme.snowflakecomputing.com", 443, "warehouse", "KeyPair")
}

fn ledger_key() -> ConnectionKey {
    ConnectionKey::new(DatabaseType::Postgres, "ledger.internal", 5432, "ledger", "UserPassword")
}

fn start() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(1_700_000_000)
}

fn setup() -> (Arc<ManualClock>, Arc<ConnectionStateManager>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let clock = Arc::new(ManualClock::new(start()));
    let manager = ConnectionStateManager::for_testing(clock.clone());
    (clock, manager)
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[test]
fn staggered_registrations_evict_only_the_oldest() {
    let (clock, manager) = setup();
    let pool1 = FakePool::new("u1", warehouse_key());
    let pool2 = FakePool::new("u2", warehouse_key());
    manager.register_state("pool1", pool1.clone(), InitialStats::Empty);
    manager.register_state("pool2", pool2.clone(), InitialStats::Empty);

    assert_eq!(manager.size(), 2);

    clock.advance(Duration::from_secs(4 * 60));
    assert_eq!(manager.evict_state_older_than(FIVE_MINUTES), 0);
    assert_eq!(manager.size(), 2);

    for name in ["pool3", "pool4", "pool5"] {
        manager.register_state(name, FakePool::new(name, ledger_key()), InitialStats::Empty);
    }
    assert_eq!(manager.size(), 5);

    clock.advance(Duration::from_secs(2 * 60));
    assert_eq!(manager.evict_state_older_than(FIVE_MINUTES), 2);

    assert_eq!(manager.size(), 3);
    assert!(manager.get_state("pool1").is_none());
    assert!(manager.get_state("pool2").is_none());
    assert!(pool1.is_closed());
    assert!(pool2.is_closed());
    for name in ["pool3", "pool4", "pool5"] {
        assert!(manager.get_state(name).is_some(), "{name} should survive");
    }
}

#[test]
fn eviction_boundary_is_inclusive() {
    let (clock, manager) = setup();
    manager.register_state("p", FakePool::new("u", ledger_key()), InitialStats::Empty);

    clock.advance(FIVE_MINUTES - Duration::from_millis(1));
    manager.evict_state_older_than(FIVE_MINUTES);
    assert_eq!(manager.size(), 1);

    clock.advance(Duration::from_millis(2));
    manager.evict_state_older_than(FIVE_MINUTES);
    assert_eq!(manager.size(), 0);
}

#[test]
fn counters_follow_the_physical_pool() {
    let (_, manager) = setup();
    let identity = Identity::new("analyst");
    let key = warehouse_key();

    for _ in 0..3 {
        manager
            .acquire(&identity, &key, || {
                Ok::<_, std::io::Error>(FakePool::new("analyst", warehouse_key()) as Arc<dyn ConnectionPool>)
            })
            .unwrap();
    }
    let name = manager.pool_name_for(&identity, &key);
    assert_eq!(manager.find_by_pool_name(&name).unwrap().statistics.requested_connections, 3);

    // A different pool under the same name starts its counters afresh.
    manager.register_state(&name, FakePool::new("analyst", warehouse_key()), InitialStats::Empty);
    assert_eq!(manager.find_by_pool_name(&name).unwrap().statistics.requested_connections, 0);
}

#[test]
fn acquire_after_eviction_builds_a_new_pool() {
    let (clock, manager) = setup();
    let identity = Identity::with_credential("analyst", "token");
    let key = warehouse_key();
    let first = FakePool::new("analyst", warehouse_key());
    let second = FakePool::new("analyst", warehouse_key());

    let handle = manager
        .acquire(&identity, &key, || Ok::<_, std::io::Error>(first.clone() as Arc<dyn ConnectionPool>))
        .unwrap();
    let first_dyn: Arc<dyn ConnectionPool> = first.clone();
    assert!(handle.wraps(&first_dyn));

    clock.advance(Duration::from_secs(600));
    assert_eq!(manager.evict_state_older_than(FIVE_MINUTES), 1);
    assert!(first.is_closed());

    let handle = manager
        .acquire(&identity, &key, || Ok::<_, std::io::Error>(second.clone() as Arc<dyn ConnectionPool>))
        .unwrap();
    let second_dyn: Arc<dyn ConnectionPool> = second.clone();
    assert!(handle.wraps(&second_dyn));
    assert_eq!(handle.statistics().requested_connections, 1);
}

// ── Concurrency ─────────────────────────────────────────────────────

#[test]
fn refresh_racing_eviction_never_loses_a_fresh_pool() {
    let (clock, manager) = setup();
    let pools: Vec<Arc<dyn ConnectionPool>> = (0..200)
        .map(|i| FakePool::new(&format!("user{i}"), ledger_key()) as Arc<dyn ConnectionPool>)
        .collect();
    for (i, pool) in pools.iter().enumerate() {
        manager.register_state(&format!("pool{i}"), pool.clone(), InitialStats::Empty);
    }
    clock.advance(Duration::from_secs(600));

    std::thread::scope(|scope| {
        for chunk in 0..4 {
            let manager = &manager;
            let pools = &pools;
            scope.spawn(move || {
                for i in (chunk * 25)..((chunk + 1) * 25) {
                    manager.register_state(&format!("pool{i}"), pools[i].clone(), InitialStats::Empty);
                }
            });
        }
        for _ in 0..2 {
            let manager = &manager;
            scope.spawn(move || {
                manager.evict_state_older_than(FIVE_MINUTES);
            });
        }
    });

    // One more pass catches anything the racing passes skipped.
    manager.evict_state_older_than(FIVE_MINUTES);

    for i in 0..100 {
        assert!(manager.get_state(&format!("pool{i}")).is_some(), "pool{i} was refreshed");
    }
    for i in 100..200 {
        assert!(manager.get_state(&format!("pool{i}")).is_none(), "pool{i} was stale");
    }
    assert_eq!(manager.size(), 100);
}

#[test]
fn concurrent_acquires_count_every_request() {
    let (_, manager) = setup();
    let key = ledger_key();
    let builds = AtomicU64::new(0);

    std::thread::scope(|scope| {
        for _ in 0..8 {
            let manager = &manager;
            let key = &key;
            let builds = &builds;
            scope.spawn(move || {
                let identity = Identity::new("etl");
                for _ in 0..50 {
                    manager
                        .acquire(&identity, key, || {
                            builds.fetch_add(1, Ordering::SeqCst);
                            Ok::<_, std::io::Error>(FakePool::new("etl", ledger_key()) as Arc<dyn ConnectionPool>)
                        })
                        .unwrap();
                }
            });
        }
    });

    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert_eq!(manager.size(), 1);
    let name = manager.pool_name_for(&Identity::new("etl"), &key);
    let requested = manager.find_by_pool_name(&name).unwrap().statistics.requested_connections;
    assert_eq!(requested, 400);
}

// ── Monitoring ──────────────────────────────────────────────────────

#[test]
fn aggregate_view_sums_pools_per_store() {
    let (_, manager) = setup();
    for user in ["u1", "u2", "u3"] {
        let name = manager.pool_name_for(&Identity::new(user), &warehouse_key());
        manager.register_state(&name, FakePool::with_gauges(user, warehouse_key(), 1, 0), InitialStats::Empty);
    }
    manager.register_state("ledger", FakePool::with_gauges("u1", ledger_key(), 0, 4), InitialStats::Empty);

    let view = manager.aggregate_view();
    assert_eq!(view.len(), 2);

    let warehouse = view
        .iter()
        .find(|s| s.database_type == DatabaseType::Snowflake)
        .unwrap();
    assert_eq!(warehouse.pool_count, 3);
    assert_eq!(warehouse.aggregated_pool_stats.total_connections, 3);
    assert_eq!(warehouse.aggregated_pool_stats.active_connections, 3);

    let ledger = view
        .iter()
        .find(|s| s.database_type == DatabaseType::Postgres)
        .unwrap();
    assert_eq!(ledger.aggregated_pool_stats.idle_connections, 4);

    let json = serde_json::to_value(&view).unwrap();
    assert!(json[0]["aggregatedPoolStats"]["totalConnections"].is_u64());
}

#[test]
fn purge_updates_prometheus_exposition() {
    let (clock, manager) = setup();
    manager.register_state("stale", FakePool::with_gauges("u1", ledger_key(), 2, 1), InitialStats::Empty);
    clock.advance(Duration::from_secs(400));
    manager.register_state("fresh", FakePool::with_gauges("u2", ledger_key(), 5, 0), InitialStats::Empty);

    assert_eq!(manager.purge(FIVE_MINUTES), 1);

    let text = manager.metrics().render_prometheus();
    assert!(text.contains("querygrid_pool_active_connections{pool=\"fresh\"} 5"));
    assert!(!text.contains("pool=\"stale\""));
}

#[test]
fn shutdown_closes_all_pools() {
    let (_, manager) = setup();
    let a = FakePool::new("u1", ledger_key());
    let b = FakePool::new("u2", warehouse_key());
    manager.register_state("a", a.clone(), InitialStats::Empty);
    manager.register_state("b", b.clone(), InitialStats::Empty);

    manager.shutdown();
    assert_eq!(manager.size(), 0);
    assert!(a.is_closed() && b.is_closed());
}

// ── Housekeeping ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn housekeeper_evicts_in_the_background() {
    let (clock, manager) = setup();
    let pool = FakePool::new("u1", ledger_key());
    manager.register_state("p", pool.clone(), InitialStats::Empty);

    let settings = RegistrySettings {
        eviction_duration: FIVE_MINUTES,
        housekeeping_interval: Duration::from_secs(30),
    };
    let housekeeper = Housekeeper::start(manager.clone(), settings).unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(manager.size(), 1);
    assert_eq!(manager.metrics().published_pool_count(), 1);

    clock.advance(Duration::from_secs(301));
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(manager.size(), 0);
    assert!(pool.is_closed());
    assert_eq!(manager.metrics().published_pool_count(), 0);

    housekeeper.stop();
}

#[test]
fn global_registry_is_shared() {
    let first = ConnectionStateManager::global();
    let second = ConnectionStateManager::global();
    assert!(Arc::ptr_eq(&first, &second));
}
