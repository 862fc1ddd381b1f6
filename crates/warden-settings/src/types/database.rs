//! Database target, pool bounds, and per-connection tuning directives.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Marker path for an in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

/// Database target and pool sizing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// Database file path, or `":memory:"`.
    pub path: String,
    /// Connections opened eagerly when a pool is built.
    pub min_connections: usize,
    /// Upper bound on live connections per pool.
    pub max_connections: usize,
    /// How long an acquire may block on an exhausted pool.
    pub acquire_timeout_ms: u64,
    /// Directives applied to every new connection.
    pub directives: TuningDirectives,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: MEMORY_PATH.to_string(),
            min_connections: 3,
            max_connections: 10,
            acquire_timeout_ms: 30_000,
            directives: TuningDirectives::default(),
        }
    }
}

/// Journal (durability) mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JournalMode {
    /// Write-ahead log.
    #[default]
    Wal,
    /// Rollback journal, deleted at the end of each transaction.
    Delete,
    /// Rollback journal, truncated instead of deleted.
    Truncate,
    /// Journal held in memory.
    Memory,
}

impl fmt::Display for JournalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Wal => "WAL",
            Self::Delete => "DELETE",
            Self::Truncate => "TRUNCATE",
            Self::Memory => "MEMORY",
        })
    }
}

/// Synchronization level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncLevel {
    /// No fsync.
    Off,
    /// Sync at critical moments; safe with WAL.
    #[default]
    Normal,
    /// Sync on every commit.
    Full,
}

impl fmt::Display for SyncLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Off => "OFF",
            Self::Normal => "NORMAL",
            Self::Full => "FULL",
        })
    }
}

/// Settings applied to a connection immediately after it is opened.
///
/// Part of a pool's identity: pools with different directives never share
/// connections.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TuningDirectives {
    /// Durability mode.
    pub journal_mode: JournalMode,
    /// Synchronization level.
    pub synchronous: SyncLevel,
    /// Page cache size; negative values are KiB (`-64000` = 64 MB).
    pub cache_size: i64,
    /// Foreign-key enforcement.
    pub foreign_keys: bool,
    /// Busy-wait timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for TuningDirectives {
    fn default() -> Self {
        Self {
            journal_mode: JournalMode::Wal,
            synchronous: SyncLevel::Normal,
            cache_size: -64_000,
            foreign_keys: true,
            busy_timeout_ms: 30_000,
        }
    }
}

impl TuningDirectives {
    /// Pragma name/value pairs in application order.
    ///
    /// The order is fixed: journal mode, synchronous, cache size, foreign
    /// keys, busy timeout.
    pub fn pragmas(&self) -> [(&'static str, String); 5] {
        [
            ("journal_mode", self.journal_mode.to_string()),
            ("synchronous", self.synchronous.to_string()),
            ("cache_size", self.cache_size.to_string()),
            (
                "foreign_keys",
                if self.foreign_keys { "ON" } else { "OFF" }.to_string(),
            ),
            ("busy_timeout", self.busy_timeout_ms.to_string()),
        ]
    }

    /// All directives as one `PRAGMA k = v;` script, in application order.
    pub fn init_script(&self) -> String {
        self.pragmas()
            .iter()
            .map(|(name, value)| format!("PRAGMA {name} = {value};"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let db = DatabaseSettings::default();
        assert_eq!(db.path, ":memory:");
        assert_eq!(db.min_connections, 3);
        assert_eq!(db.max_connections, 10);
        assert_eq!(db.acquire_timeout_ms, 30_000);

        let d = db.directives;
        assert_eq!(d.journal_mode, JournalMode::Wal);
        assert_eq!(d.synchronous, SyncLevel::Normal);
        assert_eq!(d.cache_size, -64_000);
        assert!(d.foreign_keys);
        assert_eq!(d.busy_timeout_ms, 30_000);
    }

    #[test]
    fn enums_use_uppercase_wire_names() {
        let d: TuningDirectives =
            serde_json::from_str(r#"{"journalMode": "DELETE", "synchronous": "FULL"}"#).unwrap();
        assert_eq!(d.journal_mode, JournalMode::Delete);
        assert_eq!(d.synchronous, SyncLevel::Full);
        assert_eq!(d.cache_size, -64_000);
    }

    #[test]
    fn pragmas_in_fixed_order() {
        let names: Vec<_> = TuningDirectives::default()
            .pragmas()
            .iter()
            .map(|(name, _)| *name)
            .collect();
        assert_eq!(
            names,
            [
                "journal_mode",
                "synchronous",
                "cache_size",
                "foreign_keys",
                "busy_timeout"
            ]
        );
    }

    #[test]
    fn init_script_matches_defaults() {
        assert_eq!(
            TuningDirectives::default().init_script(),
            "PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL; \
             PRAGMA cache_size = -64000; PRAGMA foreign_keys = ON; \
             PRAGMA busy_timeout = 30000;"
        );
    }

    #[test]
    fn foreign_keys_off_renders() {
        let d = TuningDirectives {
            foreign_keys: false,
            ..TuningDirectives::default()
        };
        assert_eq!(d.pragmas()[3].1, "OFF");
    }
}
