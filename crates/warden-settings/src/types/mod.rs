//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` for the JSON file
//! format. Each type implements [`Default`] with production default values
//! and is marked `#[serde(default)]` so partial JSON is accepted.

mod database;

pub use database::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "database": { "path": "auth.db", "maxConnections": 20 },
///   "logging": { "level": "info" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WardenSettings {
    /// Database target and pool bounds.
    pub database: DatabaseSettings,
    /// Pool registry bounds.
    pub registry: RegistrySettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl WardenSettings {
    /// Reject values no pool can be built from.
    pub fn validate(&self) -> Result<()> {
        if self.database.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "database.maxConnections must be at least 1".into(),
            ));
        }
        if self.database.acquire_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "database.acquireTimeoutMs must be at least 1".into(),
            ));
        }
        if self.registry.max_pools == 0 {
            return Err(SettingsError::InvalidValue(
                "registry.maxPools must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Pool registry settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistrySettings {
    /// Maximum number of distinct pools kept in the registry cache.
    pub max_pools: usize,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self { max_pools: 32 }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
