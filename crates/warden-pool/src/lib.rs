//! # warden-pool
//!
//! Keyed, health-checked `SQLite` connection pooling.
//!
//! - **Targets**: canonical file paths and named in-memory databases
//! - **Manager**: opens connections, applies tuning directives in a fixed
//!   order, validates with a `SELECT 1` round-trip, rolls back on return
//! - **Pool**: bounded, with eager warm-up, lazy growth up to the cap, and
//!   deadline-bounded waiting when exhausted
//! - **Scoped checkout**: [`PooledConnection`] returns its connection on drop,
//!   including during unwinding
//! - **Executors**: [`query`], [`execute`], and [`transaction`]
//! - **Registry**: one pool per identity, bounded LRU, race-free construction

#![deny(unsafe_code)]

pub mod errors;
pub mod executor;
pub mod manager;
pub mod pool;
pub mod registry;
pub mod sqlite;
pub mod stats;
pub mod target;

#[cfg(test)]
mod testing;

pub use errors::{DirectiveError, PoolError, Result};
pub use executor::{QueryResult, execute, query, transaction};
pub use manager::ConnectionManager;
pub use pool::{Pool, PoolOptions, PooledConnection};
pub use registry::{PoolKey, PoolRegistry};
pub use sqlite::{
    PragmaState, SqliteConnection, SqliteManager, SqlitePool, apply_directives, pragma_state,
};
pub use stats::{PoolStats, PoolStatus, RegistryEntryStats, RegistryStats};
pub use target::Target;
