//! Pool and registry statistics.

use serde::Serialize;

/// Snapshot of one pool, taken under the pool's lock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    /// Canonical target.
    pub target: String,
    /// Live connections (idle + checked out).
    pub total_connections: usize,
    /// Idle connections ready for checkout.
    pub available_connections: usize,
    /// Checked-out connections (`total - available`).
    pub active_connections: usize,
    /// Configured minimum.
    pub min_connections: usize,
    /// Configured maximum.
    pub max_connections: usize,
}

impl PoolStats {
    /// Fraction of live connections in use (0.0 to 1.0).
    ///
    /// Returns 0.0 if there are no live connections.
    #[allow(clippy::cast_precision_loss)]
    pub fn utilization(&self) -> f64 {
        if self.total_connections == 0 {
            0.0
        } else {
            self.active_connections as f64 / self.total_connections as f64
        }
    }

    /// Whether every connection the pool may hold is checked out.
    pub fn is_saturated(&self) -> bool {
        self.available_connections == 0 && self.total_connections >= self.max_connections
    }
}

/// Result of looking up stats for a pool identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum PoolStatus {
    /// The identity has a cached pool.
    Ready(PoolStats),
    /// No pool has been requested for this identity (or it was evicted from
    /// the registry cache).
    NotInitialized,
}

/// Cache statistics for a [`PoolRegistry`](crate::PoolRegistry).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that built a new pool.
    pub misses: u64,
    /// Cache bound.
    pub max_size: usize,
    /// Pools currently cached.
    pub current_size: usize,
    /// Per-pool summaries, most recently used first.
    pub entries: Vec<RegistryEntryStats>,
}

/// Monitoring summary for one cached pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntryStats {
    /// Cache hits for this identity since it was inserted.
    pub hits: u64,
    /// The pool's current snapshot.
    pub pool: PoolStats,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
