//! # warden-settings
//!
//! Layered configuration for the warden database pool.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`WardenSettings::default()`]
//! 2. **Settings file**: `$WARDEN_SETTINGS` or `~/.warden/settings.json`
//! 3. **Environment variables**: `WARDEN_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

/// Global settings singleton, initialized on first access via [`get_settings`].
static SETTINGS: OnceLock<WardenSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings from the settings file with env var
/// overrides. If loading fails, compiled defaults are used.
pub fn get_settings() -> &'static WardenSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "failed to load settings, using defaults");
            WardenSettings::default()
        })
    })
}

/// Initialize the global settings with a specific value.
///
/// Returns the settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: WardenSettings) -> std::result::Result<(), WardenSettings> {
    SETTINGS.set(settings)
}
