//! Per-pool gauge publication and Prometheus text exposition.
//!
//! The housekeeper republishes every live pool's gauges after each purge.
//! Published values therefore lag the live pools by up to one housekeeping
//! period, and an evicted pool's series disappear on the pass that evicts it.

use std::sync::RwLock;

use crate::stats::PoolSnapshot;

/// Holds the gauges published by the most recent housekeeping pass.
#[derive(Debug, Default)]
pub struct PoolMetricsPublisher {
    published: RwLock<Vec<PoolSnapshot>>,
}

impl PoolMetricsPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the published set. Pools missing from `snapshots` are dropped.
    pub fn publish(&self, mut snapshots: Vec<PoolSnapshot>) {
        snapshots.sort_by(|a, b| a.pool_name.cmp(&b.pool_name));
        tracing::debug!(pools = snapshots.len(), "pool metrics published");
        *self.published.write().unwrap_or_else(|e| e.into_inner()) = snapshots;
    }

    /// The last published values for one pool.
    pub fn sample(&self, pool_name: &str) -> Option<PoolSnapshot> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|s| s.pool_name == pool_name)
            .cloned()
    }

    pub fn published_pool_count(&self) -> usize {
        self.published.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Render the published set for a `/metrics` endpoint.
    pub fn render_prometheus(&self) -> String {
        render_prometheus(&self.published.read().unwrap_or_else(|e| e.into_inner()))
    }
}

/// Render pool snapshots into Prometheus text format, one `pool` label per series.
pub fn render_prometheus(snapshots: &[PoolSnapshot]) -> String {
    let mut out = String::new();

    let gauges: [(&str, &str, fn(&PoolSnapshot) -> u64); 4] = [
        (
            "querygrid_pool_total_connections",
            "Physical connections held by the pool.",
            |s: &PoolSnapshot| s.dynamic.total_connections,
        ),
        (
            "querygrid_pool_idle_connections",
            "Connections idle in the pool.",
            |s: &PoolSnapshot| s.dynamic.idle_connections,
        ),
        (
            "querygrid_pool_active_connections",
            "Connections checked out of the pool.",
            |s: &PoolSnapshot| s.dynamic.active_connections,
        ),
        (
            "querygrid_pool_threads_awaiting_connection",
            "Callers blocked waiting for a connection.",
            |s: &PoolSnapshot| s.dynamic.threads_awaiting_connection,
        ),
    ];

    for (name, help, value) in gauges {
        out.push_str(&format!("# HELP {name} {help}\n"));
        out.push_str(&format!("# TYPE {name} gauge\n"));
        for s in snapshots {
            out.push_str(&format!(
                "{name}{{pool=\"{}\"}} {}\n",
                escape_label(&s.pool_name),
                value(s)
            ));
        }
    }

    out.push_str("# HELP querygrid_pool_requested_connections_total Connection requests served by the pool.\n");
    out.push_str("# TYPE querygrid_pool_requested_connections_total counter\n");
    for s in snapshots {
        out.push_str(&format!(
            "querygrid_pool_requested_connections_total{{pool=\"{}\"}} {}\n",
            escape_label(&s.pool_name),
            s.statistics.requested_connections
        ));
    }

    out
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
