//! Keyed cache of pools.
//!
//! A [`PoolRegistry`] maps a [`PoolKey`] (canonical target, capacity bounds,
//! acquire timeout, tuning directives) to one shared [`SqlitePool`]. The map
//! is bounded and evicts the least recently used identity when full.
//!
//! Construction is guarded per identity: the registry lock is held only long
//! enough to find or insert the entry's cell, and the pool itself is built
//! while holding that cell's lock. Concurrent first callers for one identity
//! therefore wait on the same cell and all receive the instance the first
//! caller built, while callers for other identities are never blocked by a
//! slow build. A failed build leaves nothing behind.
//!
//! Evicting an identity from the cache, or [`clear`](PoolRegistry::clear)ing
//! it, does not shut any pool down. Handles already given out keep working
//! until they are dropped.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use rusqlite::{Params, Transaction};
use tracing::{debug, info};
use warden_settings::{DatabaseSettings, TuningDirectives, WardenSettings};

use crate::errors::Result;
use crate::executor::{self, QueryResult};
use crate::pool::{Pool, PoolOptions};
use crate::sqlite::{SqliteManager, SqlitePool};
use crate::stats::{PoolStatus, RegistryEntryStats, RegistryStats};
use crate::target::Target;

/// Default bound on cached pools.
pub const DEFAULT_MAX_POOLS: usize = 32;

/// Everything that decides whether two requests share a pool.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PoolKey {
    /// Canonical target.
    pub target: Target,
    /// Capacity bounds and acquire timeout.
    pub options: PoolOptions,
    /// Per-connection tuning.
    pub directives: TuningDirectives,
}

impl PoolKey {
    /// Key from its parts.
    pub fn new(target: Target, options: PoolOptions, directives: TuningDirectives) -> Self {
        Self {
            target,
            options,
            directives,
        }
    }

    /// Key with default bounds and directives.
    pub fn for_target(target: Target) -> Self {
        Self::new(target, PoolOptions::default(), TuningDirectives::default())
    }

    /// Key described by database settings.
    pub fn from_settings(settings: &DatabaseSettings) -> Self {
        Self::new(
            Target::from_config_path(&settings.path),
            PoolOptions::from(settings),
            settings.directives.clone(),
        )
    }
}

type PoolCell = Arc<Mutex<Option<SqlitePool>>>;

struct Entry {
    cell: PoolCell,
    hits: u64,
    last_used: u64,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<PoolKey, Entry>,
    hits: u64,
    misses: u64,
    tick: u64,
}

/// Bounded, least-recently-used cache of pools keyed by identity.
pub struct PoolRegistry {
    max_pools: usize,
    state: Mutex<RegistryState>,
}

static GLOBAL: OnceLock<PoolRegistry> = OnceLock::new();

impl PoolRegistry {
    /// Empty registry holding at most `max_pools` pools (at least one).
    pub fn new(max_pools: usize) -> Self {
        Self {
            max_pools: max_pools.max(1),
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Empty registry sized from settings.
    pub fn from_settings(settings: &WardenSettings) -> Self {
        Self::new(settings.registry.max_pools)
    }

    /// Process-wide registry, sized from [`warden_settings::get_settings`] on
    /// first use.
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(|| Self::from_settings(warden_settings::get_settings()))
    }

    /// Return the pool for `key`, building it on first request.
    pub fn get_or_create(&self, key: &PoolKey) -> Result<SqlitePool> {
        let cell = self.cell_for(key);
        let mut slot = cell.lock();

        if let Some(pool) = slot.as_ref() {
            let pool = pool.clone();
            drop(slot);
            self.record_hit(key, &cell);
            return Ok(pool);
        }

        info!(db = %key.target, min = key.options.min_connections, max = key.options.max_connections, "building pool");
        self.state.lock().misses += 1;
        let manager = SqliteManager::new(key.target.clone(), key.directives.clone());
        match Pool::new(manager, key.options.clone()) {
            Ok(pool) => {
                *slot = Some(pool.clone());
                drop(slot);
                self.trim(key);
                Ok(pool)
            }
            Err(err) => {
                drop(slot);
                self.forget_if_unbuilt(key, &cell);
                Err(err)
            }
        }
    }

    /// Current stats of the pool cached for `key`, without counting as a
    /// lookup.
    pub fn pool_stats(&self, key: &PoolKey) -> PoolStatus {
        let cell = self
            .state
            .lock()
            .entries
            .get(key)
            .map(|entry| Arc::clone(&entry.cell));
        let pool = cell.and_then(|cell| cell.lock().clone());
        match pool {
            Some(pool) => PoolStatus::Ready(pool.stats()),
            None => PoolStatus::NotInitialized,
        }
    }

    /// Cache counters and a summary of every cached pool, most recently used
    /// first.
    pub fn stats(&self) -> RegistryStats {
        let (hits, misses, current_size, mut cells) = {
            let state = self.state.lock();
            let cells: Vec<_> = state
                .entries
                .values()
                .map(|entry| (entry.last_used, entry.hits, Arc::clone(&entry.cell)))
                .collect();
            (state.hits, state.misses, state.entries.len(), cells)
        };
        cells.sort_by(|a, b| b.0.cmp(&a.0));

        let entries = cells
            .into_iter()
            .filter_map(|(_, hits, cell)| {
                let pool = cell.lock().clone()?;
                Some(RegistryEntryStats {
                    hits,
                    pool: pool.stats(),
                })
            })
            .collect();

        RegistryStats {
            hits,
            misses,
            max_size: self.max_pools,
            current_size,
            entries,
        }
    }

    /// Drop every cached pool and reset the counters.
    ///
    /// Pools already handed out stay usable; later lookups build fresh ones.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        let dropped = state.entries.len();
        *state = RegistryState::default();
        debug!(dropped, "pool registry cleared");
    }

    /// Number of cached identities.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cache bound.
    pub fn max_pools(&self) -> usize {
        self.max_pools
    }

    /// [`executor::query`] against the pool for `key`.
    pub fn query<P: Params>(&self, key: &PoolKey, sql: &str, params: P) -> Result<QueryResult> {
        executor::query(&self.get_or_create(key)?, sql, params)
    }

    /// [`executor::execute`] against the pool for `key`.
    pub fn execute<P: Params>(&self, key: &PoolKey, sql: &str, params: P) -> Result<usize> {
        executor::execute(&self.get_or_create(key)?, sql, params)
    }

    /// [`executor::transaction`] against the pool for `key`.
    pub fn transaction<T, F>(&self, key: &PoolKey, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        executor::transaction(&self.get_or_create(key)?, f)
    }

    fn cell_for(&self, key: &PoolKey) -> PoolCell {
        let mut state = self.state.lock();
        state.tick += 1;
        let tick = state.tick;
        let entry = state.entries.entry(key.clone()).or_insert_with(|| Entry {
            cell: PoolCell::default(),
            hits: 0,
            last_used: tick,
        });
        entry.last_used = tick;
        Arc::clone(&entry.cell)
    }

    fn record_hit(&self, key: &PoolKey, cell: &PoolCell) {
        let mut state = self.state.lock();
        state.hits += 1;
        if let Some(entry) = state.entries.get_mut(key) {
            if Arc::ptr_eq(&entry.cell, cell) {
                entry.hits += 1;
            }
        }
    }

    fn forget_if_unbuilt(&self, key: &PoolKey, cell: &PoolCell) {
        let mut state = self.state.lock();
        let stale = state
            .entries
            .get(key)
            .is_some_and(|entry| {
                // A locked cell means another caller is building it now.
                Arc::ptr_eq(&entry.cell, cell)
                    && entry.cell.try_lock().is_some_and(|slot| slot.is_none())
            });
        if stale {
            let _ = state.entries.remove(key);
        }
    }

    /// Evict least recently used identities until the cache fits, never
    /// evicting `keep` or a pool another caller is still building.
    fn trim(&self, keep: &PoolKey) {
        let mut state = self.state.lock();
        while state.entries.len() > self.max_pools {
            let oldest = state
                .entries
                .iter()
                .filter(|(key, entry)| *key != keep && entry.cell.try_lock().is_some())
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());
            let Some(oldest) = oldest else { break };
            let _ = state.entries.remove(&oldest);
            debug!(db = %oldest.target, "evicted least recently used pool from registry");
        }
    }
}

impl Default for PoolRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_POOLS)
    }
}

impl std::fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("max_pools", &self.max_pools)
            .field("len", &self.len())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
