//! Bounded, health-checked connection pool.
//!
//! One [`Pool`] owns every connection for one identity. Connections live in
//! exactly one place at a time: the idle queue, or a single
//! [`PooledConnection`] guard held by a caller. The guard returns its
//! connection on drop, on every exit path including unwinding.
//!
//! # Bookkeeping
//!
//! A single mutex guards the idle queue, the live-id set, and the live
//! counter. It is held only for O(1) bookkeeping; opening, validating,
//! resetting, and closing connections all happen outside it. A slot is
//! reserved (counter incremented) before a new connection is opened, so
//! `live <= max` holds even while connections are being created.
//!
//! # Acquire
//!
//! 1. Pop an idle connection and validate it; evict and retry if it fails.
//! 2. With nothing idle and `live < max`, reserve a slot and open a new
//!    connection immediately.
//! 3. At capacity, wait for a release or eviction until the deadline, then
//!    fail with [`PoolError::Exhausted`].
//!
//! Every retry runs against the same deadline, so the total wait never
//! exceeds the caller's budget.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};
use warden_settings::DatabaseSettings;

use crate::errors::{PoolError, Result};
use crate::manager::ConnectionManager;
use crate::stats::PoolStats;

/// Default connections opened when a pool is built.
pub const DEFAULT_MIN_CONNECTIONS: usize = 3;
/// Default connection cap.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;
/// Default acquire timeout.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Capacity and timeout bounds for one pool.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PoolOptions {
    /// Connections opened eagerly at construction (capped at `max_connections`).
    pub min_connections: usize,
    /// Upper bound on live connections.
    pub max_connections: usize,
    /// Default acquire timeout.
    pub acquire_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            min_connections: DEFAULT_MIN_CONNECTIONS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

impl PoolOptions {
    /// Options with the given bounds and the default timeout.
    pub fn new(min_connections: usize, max_connections: usize) -> Self {
        Self {
            min_connections,
            max_connections,
            ..Self::default()
        }
    }

    /// Set the acquire timeout.
    #[must_use]
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Reject options no pool can honor.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(PoolError::InvalidConfig(
                "max_connections must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl From<&DatabaseSettings> for PoolOptions {
    fn from(settings: &DatabaseSettings) -> Self {
        Self {
            min_connections: settings.min_connections,
            max_connections: settings.max_connections,
            acquire_timeout: Duration::from_millis(settings.acquire_timeout_ms),
        }
    }
}

/// A connection tagged with its pool-local id.
struct Slot<C> {
    id: u64,
    conn: C,
}

struct PoolState<C> {
    idle: VecDeque<Slot<C>>,
    live: HashSet<u64>,
    /// Live connections plus slots reserved for connections being opened.
    count: usize,
    next_id: u64,
}

impl<C> PoolState<C> {
    fn reserve(&mut self) -> u64 {
        self.count += 1;
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

enum Next<C> {
    Idle(Slot<C>),
    Grow(u64),
    Exhausted,
}

struct Shared<M: ConnectionManager> {
    manager: M,
    options: PoolOptions,
    target: String,
    state: Mutex<PoolState<M::Connection>>,
    released: Condvar,
}

/// A pool of connections produced by a [`ConnectionManager`].
///
/// Cloning is cheap and yields another handle to the same pool.
pub struct Pool<M: ConnectionManager> {
    shared: Arc<Shared<M>>,
}

impl<M: ConnectionManager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: ConnectionManager> fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("target", &self.shared.target)
            .field("options", &self.shared.options)
            .finish_non_exhaustive()
    }
}

impl<M: ConnectionManager> Pool<M> {
    /// Build a pool and eagerly open `min(min_connections, max_connections)`
    /// connections.
    ///
    /// If any of them fails to open, the ones already opened are closed and
    /// the error is returned; no pool is produced.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn new(manager: M, options: PoolOptions) -> Result<Self> {
        options.validate()?;
        let target = manager.target();
        let warm = options.min_connections.min(options.max_connections);

        let mut idle = VecDeque::with_capacity(options.max_connections);
        for id in 0..warm as u64 {
            match manager.connect() {
                Ok(conn) => idle.push_back(Slot { id, conn }),
                Err(err) => {
                    warn!(db = %target, error = %err, opened = idle.len(), "pool warm-up failed");
                    for slot in idle.drain(..) {
                        if let Err(close_err) = manager.close(slot.conn) {
                            debug!(db = %target, error = %close_err, "close during warm-up rollback failed");
                        }
                    }
                    return Err(err);
                }
            }
        }

        let live: HashSet<u64> = idle.iter().map(|slot| slot.id).collect();
        let count = live.len();
        info!(
            db = %target,
            min = options.min_connections,
            max = options.max_connections,
            timeout_ms = options.acquire_timeout.as_millis() as u64,
            "pool created"
        );
        metrics::counter!("pool_connections_created_total", "target" => target.clone())
            .increment(count as u64);
        metrics::gauge!("pool_connections_live", "target" => target.clone()).set(count as f64);

        Ok(Self {
            shared: Arc::new(Shared {
                manager,
                options,
                target,
                state: Mutex::new(PoolState {
                    idle,
                    live,
                    count,
                    next_id: warm as u64,
                }),
                released: Condvar::new(),
            }),
        })
    }

    /// Check out a connection, waiting up to the configured timeout.
    pub fn get(&self) -> Result<PooledConnection<M>> {
        self.get_timeout(self.shared.options.acquire_timeout)
    }

    /// Check out a connection, waiting up to `timeout`.
    pub fn get_timeout(&self, timeout: Duration) -> Result<PooledConnection<M>> {
        let start = Instant::now();
        self.acquire(start, deadline_after(start, timeout))
    }

    /// Check out a connection, giving up at the earlier of `deadline` and
    /// the pool's own timeout.
    pub fn get_before(&self, deadline: Instant) -> Result<PooledConnection<M>> {
        let start = Instant::now();
        let own = deadline_after(start, self.shared.options.acquire_timeout);
        self.acquire(start, deadline.min(own))
    }

    /// Run `f` with a checked-out connection. The connection goes back to the
    /// pool whether `f` returns `Ok`, returns `Err`, or panics.
    pub fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut M::Connection) -> Result<T>,
    {
        let mut conn = self.get()?;
        f(&mut conn)
    }

    /// Consistent snapshot of the pool's counters.
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        let total = state.count;
        let available = state.idle.len();
        PoolStats {
            target: self.shared.target.clone(),
            total_connections: total,
            available_connections: available,
            active_connections: total - available,
            min_connections: self.shared.options.min_connections,
            max_connections: self.shared.options.max_connections,
        }
    }

    /// Canonical target of this pool.
    pub fn target(&self) -> &str {
        &self.shared.target
    }

    /// Bounds this pool was built with.
    pub fn options(&self) -> &PoolOptions {
        &self.shared.options
    }

    /// Whether two handles refer to the same pool.
    pub fn same_pool(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn acquire(&self, start: Instant, deadline: Instant) -> Result<PooledConnection<M>> {
        let shared = &self.shared;
        loop {
            match shared.next_slot(deadline) {
                Next::Idle(mut slot) => {
                    if shared.manager.is_valid(&mut slot.conn) {
                        return Ok(self.checked_out(slot, start));
                    }
                    debug!(db = %shared.target, id = slot.id, "idle connection failed validation, evicting");
                    shared.evict(slot);
                }
                Next::Grow(id) => {
                    let slot = shared.open_reserved(id)?;
                    return Ok(self.checked_out(slot, start));
                }
                Next::Exhausted => {
                    let waited = start.elapsed();
                    metrics::counter!("pool_exhausted_total", "target" => shared.target.clone())
                        .increment(1);
                    warn!(
                        db = %shared.target,
                        waited_ms = waited.as_millis() as u64,
                        max = shared.options.max_connections,
                        "pool exhausted"
                    );
                    return Err(PoolError::Exhausted {
                        target: shared.target.clone(),
                        waited,
                        max: shared.options.max_connections,
                    });
                }
            }
        }
    }

    fn checked_out(&self, slot: Slot<M::Connection>, start: Instant) -> PooledConnection<M> {
        metrics::histogram!("pool_acquire_wait_seconds", "target" => self.shared.target.clone())
            .record(start.elapsed().as_secs_f64());
        PooledConnection {
            pool: self.clone(),
            slot: Some(slot),
        }
    }
}

impl<M: ConnectionManager> Shared<M> {
    /// Decide where the next connection comes from, blocking at capacity.
    fn next_slot(&self, deadline: Instant) -> Next<M::Connection> {
        let mut state = self.state.lock();
        loop {
            if let Some(slot) = state.idle.pop_front() {
                return Next::Idle(slot);
            }
            if state.count < self.options.max_connections {
                return Next::Grow(state.reserve());
            }
            if Instant::now() >= deadline {
                return Next::Exhausted;
            }
            let _ = self.released.wait_until(&mut state, deadline);
        }
    }

    /// Open a connection into a slot reserved by [`PoolState::reserve`].
    fn open_reserved(&self, id: u64) -> Result<Slot<M::Connection>> {
        match self.manager.connect() {
            Ok(conn) => {
                let count = {
                    let mut state = self.state.lock();
                    let _ = state.live.insert(id);
                    state.count
                };
                debug!(db = %self.target, id, live = count, "opened connection");
                metrics::counter!("pool_connections_created_total", "target" => self.target.clone())
                    .increment(1);
                self.record_live(count);
                Ok(Slot { id, conn })
            }
            Err(err) => {
                {
                    let mut state = self.state.lock();
                    state.count -= 1;
                }
                self.released.notify_one();
                warn!(db = %self.target, error = %err, "failed to open connection");
                Err(err)
            }
        }
    }

    /// Return a connection after use.
    ///
    /// A connection whose id is not live (already evicted) is closed without
    /// touching any counter.
    fn release(&self, mut slot: Slot<M::Connection>) {
        let member = self.state.lock().live.contains(&slot.id);
        if !member {
            debug!(db = %self.target, id = slot.id, "released connection is not live, closing");
            self.close_quietly(slot.conn);
            return;
        }

        if !self.manager.is_valid(&mut slot.conn) {
            debug!(db = %self.target, id = slot.id, "returned connection failed validation, evicting");
            self.evict(slot);
            return;
        }
        if let Err(err) = self.manager.reset(&mut slot.conn) {
            warn!(db = %self.target, id = slot.id, error = %err, "reset failed, evicting");
            self.evict(slot);
            return;
        }

        let mut state = self.state.lock();
        if state.idle.len() >= self.options.max_connections {
            drop(state);
            warn!(db = %self.target, id = slot.id, "idle queue full, evicting");
            self.evict(slot);
            return;
        }
        state.idle.push_back(slot);
        drop(state);
        self.released.notify_one();
    }

    /// Drop a connection from the live set and close it. Never fails.
    fn evict(&self, slot: Slot<M::Connection>) {
        let removed = {
            let mut state = self.state.lock();
            let removed = state.live.remove(&slot.id);
            if removed {
                state.count -= 1;
            }
            removed.then_some(state.count)
        };
        if let Some(count) = removed {
            self.released.notify_one();
            metrics::counter!("pool_connections_evicted_total", "target" => self.target.clone())
                .increment(1);
            self.record_live(count);
            debug!(db = %self.target, id = slot.id, live = count, "evicted connection");
        }
        self.close_quietly(slot.conn);
    }

    fn close_quietly(&self, conn: M::Connection) {
        if let Err(err) = self.manager.close(conn) {
            debug!(db = %self.target, error = %err, "close failed, ignoring");
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_live(&self, count: usize) {
        metrics::gauge!("pool_connections_live", "target" => self.target.clone()).set(count as f64);
    }
}

fn deadline_after(start: Instant, timeout: Duration) -> Instant {
    start
        .checked_add(timeout)
        .unwrap_or_else(|| start + Duration::from_secs(60 * 60 * 24 * 365))
}

/// A connection checked out of a [`Pool`].
///
/// Dereferences to the underlying connection. Dropping the guard returns the
/// connection: it is validated and reset, then queued for reuse, or evicted
/// if either step fails.
pub struct PooledConnection<M: ConnectionManager> {
    pool: Pool<M>,
    slot: Option<Slot<M::Connection>>,
}

impl<M: ConnectionManager> PooledConnection<M> {
    /// Pool-local id of this connection.
    pub fn id(&self) -> u64 {
        self.slot.as_ref().map_or(0, |slot| slot.id)
    }

    /// Return the connection now instead of at end of scope.
    pub fn release(self) {}

    /// Close the connection and free its capacity instead of returning it.
    pub fn evict(mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.shared.evict(slot);
        }
    }
}

impl<M: ConnectionManager> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        &self.slot.as_ref().expect("connection already returned").conn
    }
}

impl<M: ConnectionManager> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.slot.as_mut().expect("connection already returned").conn
    }
}

impl<M: ConnectionManager> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.shared.release(slot);
        }
    }
}

impl<M: ConnectionManager> fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("target", &self.pool.shared.target)
            .field("id", &self.id())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
