//! The seam between a [`Pool`](crate::Pool) and the driver it pools.
//!
//! A manager knows how to open, probe, reset, and close one kind of blocking
//! resource. The pool owns capacity, waiting, and eviction; the manager owns
//! everything that touches the driver.

use crate::errors::Result;

/// Creates, validates, resets, and closes connections for one target.
pub trait ConnectionManager: Send + Sync + 'static {
    /// The pooled resource.
    type Connection: Send + 'static;

    /// Open a new connection with all tuning applied.
    ///
    /// Must not leak a partially opened handle on failure.
    fn connect(&self) -> Result<Self::Connection>;

    /// Cheap round-trip probe. Never fails; any error reads as `false`.
    fn is_valid(&self, conn: &mut Self::Connection) -> bool;

    /// Return the connection to a clean state before it goes back to the
    /// idle queue (e.g. abort any open transaction).
    fn reset(&self, conn: &mut Self::Connection) -> Result<()>;

    /// Close the connection.
    fn close(&self, conn: Self::Connection) -> Result<()>;

    /// Human-readable target, used in errors, logs, and stats.
    fn target(&self) -> String;
}
