//! Error types for the pool subsystem.
//!
//! Callers see four kinds of failure: the connection could not be opened or
//! tuned, the pool stayed exhausted past the deadline, the statement itself
//! failed, or the pool options were unusable. Connection validation failures
//! never surface here; they are logged and turned into evictions.

use std::time::Duration;

use thiserror::Error;

/// Boxed error from a connection manager.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned by pools, executors, and the registry.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Opening a connection or applying a tuning directive failed.
    #[error("connection error for {target}: {source}")]
    Connection {
        /// Canonical target the connection was opened against.
        target: String,
        /// Underlying driver or directive error.
        #[source]
        source: BoxError,
    },

    /// No connection became available before the deadline and the pool is at
    /// capacity.
    #[error("pool exhausted for {target}: no connection within {waited:?} (max {max})")]
    Exhausted {
        /// Canonical target of the exhausted pool.
        target: String,
        /// Time spent waiting before giving up.
        waited: Duration,
        /// Configured maximum capacity.
        max: usize,
    },

    /// The statement failed.
    #[error("statement error: {0}")]
    Statement(#[source] rusqlite::Error),

    /// The statement failed and the rollback that followed failed too.
    #[error("statement error: {source} (rollback also failed: {rollback})")]
    StatementRollback {
        /// The statement error.
        #[source]
        source: rusqlite::Error,
        /// The rollback error.
        rollback: rusqlite::Error,
    },

    /// Pool options were rejected.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}

impl PoolError {
    /// Wrap a manager error as a connection failure for `target`.
    pub fn connection(target: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Connection {
            target: target.into(),
            source: source.into(),
        }
    }

    /// Whether retrying later may succeed without any change by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

impl From<rusqlite::Error> for PoolError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Statement(e)
    }
}

/// A tuning directive could not be applied to a freshly opened connection.
#[derive(Debug, Error)]
#[error("failed to apply PRAGMA {directive}: {source}")]
pub struct DirectiveError {
    /// Pragma name.
    pub directive: &'static str,
    /// Driver error.
    #[source]
    pub source: rusqlite::Error,
}

/// Convenience type alias for pool results.
pub type Result<T> = std::result::Result<T, PoolError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
