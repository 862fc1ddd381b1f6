//! In-process fake [`ConnectionManager`] for pool tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::errors::{PoolError, Result};
use crate::manager::ConnectionManager;

/// Fake connection. Tests flip `healthy` through the pooled guard.
#[derive(Debug)]
pub struct FakeConnection {
    pub healthy: bool,
    epoch: u64,
}

/// Counts opens, closes, and resets, and can be told to fail.
#[derive(Clone, Debug)]
pub struct FakeManager {
    opened: Arc<AtomicU64>,
    closed: Arc<AtomicU64>,
    resets: Arc<AtomicU64>,
    /// Successful connects allowed before `connect` starts failing.
    connect_budget: Arc<AtomicU64>,
    epoch: Arc<AtomicU64>,
    pub fail_reset: Arc<AtomicBool>,
    pub fail_close: Arc<AtomicBool>,
}

impl Default for FakeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeManager {
    pub fn new() -> Self {
        Self {
            opened: Arc::default(),
            closed: Arc::default(),
            resets: Arc::default(),
            connect_budget: Arc::new(AtomicU64::new(u64::MAX)),
            epoch: Arc::default(),
            fail_reset: Arc::default(),
            fail_close: Arc::default(),
        }
    }

    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u64 {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> u64 {
        self.resets.load(Ordering::SeqCst)
    }

    /// Let `n` more connects succeed, then fail every one after.
    pub fn fail_connect_after(&self, n: u64) {
        self.connect_budget.store(n, Ordering::SeqCst);
    }

    pub fn allow_connect(&self) {
        self.connect_budget.store(u64::MAX, Ordering::SeqCst);
    }

    /// Make every connection opened so far fail validation.
    pub fn invalidate_all(&self) {
        let _ = self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// A healthy connection that was never counted as opened.
    pub fn spare_connection(&self) -> FakeConnection {
        FakeConnection {
            healthy: true,
            epoch: self.epoch.load(Ordering::SeqCst),
        }
    }
}

impl ConnectionManager for FakeManager {
    type Connection = FakeConnection;

    fn connect(&self) -> Result<FakeConnection> {
        let allowed = self
            .connect_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                u64::MAX => Some(u64::MAX),
                n => Some(n - 1),
            })
            .is_ok();
        if !allowed {
            return Err(PoolError::connection(
                self.target(),
                std::io::Error::other("connect refused"),
            ));
        }
        let _ = self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(self.spare_connection())
    }

    fn is_valid(&self, conn: &mut FakeConnection) -> bool {
        conn.healthy && conn.epoch == self.epoch.load(Ordering::SeqCst)
    }

    fn reset(&self, _conn: &mut FakeConnection) -> Result<()> {
        let _ = self.resets.fetch_add(1, Ordering::SeqCst);
        if self.fail_reset.load(Ordering::SeqCst) {
            return Err(PoolError::connection(
                self.target(),
                std::io::Error::other("reset failed"),
            ));
        }
        Ok(())
    }

    fn close(&self, _conn: FakeConnection) -> Result<()> {
        let _ = self.closed.fetch_add(1, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(PoolError::connection(
                self.target(),
                std::io::Error::other("close failed"),
            ));
        }
        Ok(())
    }

    fn target(&self) -> String {
        "fake".to_string()
    }
}
