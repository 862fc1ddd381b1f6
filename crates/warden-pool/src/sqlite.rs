//! `SQLite` connection manager.
//!
//! Opens connections against a [`Target`] and applies the configured
//! [`TuningDirectives`] to every new connection, one pragma at a time in the
//! fixed order, so a failure names the directive that broke. Validation is a
//! `SELECT 1` round-trip; reset rolls back any transaction left open.

use rusqlite::{Connection, OpenFlags};
use tracing::debug;
use warden_settings::TuningDirectives;

use crate::errors::{DirectiveError, PoolError, Result};
use crate::manager::ConnectionManager;
use crate::pool::{Pool, PooledConnection};
use crate::target::Target;

/// Pool of `SQLite` connections.
pub type SqlitePool = Pool<SqliteManager>;

/// A connection checked out of a [`SqlitePool`].
pub type SqliteConnection = PooledConnection<SqliteManager>;

/// [`ConnectionManager`] for `rusqlite` connections.
#[derive(Clone, Debug)]
pub struct SqliteManager {
    target: Target,
    directives: TuningDirectives,
}

impl SqliteManager {
    /// Manager for `target` applying `directives` to each connection.
    pub fn new(target: Target, directives: TuningDirectives) -> Self {
        Self { target, directives }
    }

    fn open(&self) -> rusqlite::Result<Connection> {
        match &self.target {
            Target::File(path) => Connection::open(path),
            Target::Memory(label) => Connection::open_with_flags(
                Target::memory_uri(label),
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            ),
        }
    }
}

impl ConnectionManager for SqliteManager {
    type Connection = Connection;

    fn connect(&self) -> Result<Connection> {
        let conn = self
            .open()
            .map_err(|e| PoolError::connection(self.target(), e))?;

        if let Err(err) = apply_directives(&conn, &self.directives) {
            if let Err((_, close_err)) = conn.close() {
                debug!(db = %self.target, error = %close_err, "close after directive failure failed");
            }
            return Err(PoolError::connection(self.target(), err));
        }
        Ok(conn)
    }

    fn is_valid(&self, conn: &mut Connection) -> bool {
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }

    fn reset(&self, conn: &mut Connection) -> Result<()> {
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    fn close(&self, conn: Connection) -> Result<()> {
        conn.close()
            .map_err(|(_, e)| PoolError::connection(self.target(), e))
    }

    fn target(&self) -> String {
        self.target.to_string()
    }
}

/// Apply every directive in order, stopping at the first failure.
pub fn apply_directives(
    conn: &Connection,
    directives: &TuningDirectives,
) -> std::result::Result<(), DirectiveError> {
    for (name, value) in directives.pragmas() {
        conn.execute_batch(&format!("PRAGMA {name} = {value};"))
            .map_err(|source| DirectiveError {
                directive: name,
                source,
            })?;
    }
    Ok(())
}

/// Effective pragma values read back from a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PragmaState {
    /// Journal mode (`wal`, or `memory` for in-memory databases).
    pub journal_mode: String,
    /// Synchronous level (0 = OFF, 1 = NORMAL, 2 = FULL).
    pub synchronous: i64,
    /// Page cache size.
    pub cache_size: i64,
    /// Whether foreign keys are enforced.
    pub foreign_keys_enabled: bool,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: i64,
}

/// Read the tuning pragmas currently in effect on `conn`.
pub fn pragma_state(conn: &Connection) -> Result<PragmaState> {
    let read_i64 = |pragma: &str| -> rusqlite::Result<i64> {
        conn.query_row(&format!("PRAGMA {pragma}"), [], |row| row.get(0))
    };
    Ok(PragmaState {
        journal_mode: conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?,
        synchronous: read_i64("synchronous")?,
        cache_size: read_i64("cache_size")?,
        foreign_keys_enabled: read_i64("foreign_keys")? == 1,
        busy_timeout_ms: read_i64("busy_timeout")?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use warden_settings::{JournalMode, SyncLevel};

    use super::*;

    #[test]
    fn file_connection_gets_directives() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SqliteManager::new(
            Target::file(dir.path().join("auth.db")),
            TuningDirectives::default(),
        );
        let conn = manager.connect().unwrap();
        let state = pragma_state(&conn).unwrap();
        assert_eq!(state.journal_mode, "wal");
        assert_eq!(state.synchronous, 1);
        assert_eq!(state.cache_size, -64_000);
        assert!(state.foreign_keys_enabled);
        assert_eq!(state.busy_timeout_ms, 30_000);
        manager.close(conn).unwrap();
    }

    #[test]
    fn overridden_directives_apply() {
        let dir = tempfile::tempdir().unwrap();
        let directives = TuningDirectives {
            journal_mode: JournalMode::Delete,
            synchronous: SyncLevel::Full,
            cache_size: -2000,
            foreign_keys: false,
            busy_timeout_ms: 250,
        };
        let manager = SqliteManager::new(Target::file(dir.path().join("auth.db")), directives);
        let conn = manager.connect().unwrap();
        let state = pragma_state(&conn).unwrap();
        assert_eq!(state.journal_mode, "delete");
        assert_eq!(state.synchronous, 2);
        assert_eq!(state.cache_size, -2000);
        assert!(!state.foreign_keys_enabled);
        assert_eq!(state.busy_timeout_ms, 250);
    }

    #[test]
    fn same_memory_label_shares_database() {
        let target = Target::anonymous_memory();
        let manager = SqliteManager::new(target, TuningDirectives::default());
        let a = manager.connect().unwrap();
        let b = manager.connect().unwrap();
        a.execute_batch("CREATE TABLE users (id INTEGER PRIMARY KEY); INSERT INTO users DEFAULT VALUES;")
            .unwrap();
        let count: i64 = b
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn different_memory_labels_are_isolated() {
        let a = SqliteManager::new(Target::anonymous_memory(), TuningDirectives::default())
            .connect()
            .unwrap();
        let b = SqliteManager::new(Target::anonymous_memory(), TuningDirectives::default())
            .connect()
            .unwrap();
        a.execute_batch("CREATE TABLE users (id INTEGER PRIMARY KEY);")
            .unwrap();
        assert!(b.query_row("SELECT COUNT(*) FROM users", [], |row| row.get::<_, i64>(0)).is_err());
    }

    #[test]
    fn unopenable_path_is_connection_error() {
        let manager = SqliteManager::new(
            Target::file("/nonexistent-warden-dir/deeper/auth.db"),
            TuningDirectives::default(),
        );
        assert_matches!(manager.connect(), Err(PoolError::Connection { target, .. }) if target.contains("auth.db"));
    }

    #[test]
    fn validation_round_trip() {
        let manager = SqliteManager::new(Target::anonymous_memory(), TuningDirectives::default());
        let mut conn = manager.connect().unwrap();
        assert!(manager.is_valid(&mut conn));
    }

    #[test]
    fn reset_rolls_back_open_transaction() {
        let manager = SqliteManager::new(Target::anonymous_memory(), TuningDirectives::default());
        let mut conn = manager.connect().unwrap();
        conn.execute_batch("CREATE TABLE t (v INTEGER); BEGIN; INSERT INTO t VALUES (1);")
            .unwrap();
        assert!(!conn.is_autocommit());

        manager.reset(&mut conn).unwrap();
        assert!(conn.is_autocommit());
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn reset_without_transaction_is_noop() {
        let manager = SqliteManager::new(Target::anonymous_memory(), TuningDirectives::default());
        let mut conn = manager.connect().unwrap();
        manager.reset(&mut conn).unwrap();
        assert!(conn.is_autocommit());
    }
}
