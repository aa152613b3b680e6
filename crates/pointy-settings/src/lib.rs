//! # pointy-settings
//!
//! Settings are loaded once at startup from three layers, later layers winning:
//! 1. **Compiled defaults**: [`PointySettings::default()`]
//! 2. **Settings file**: `~/.pointy/settings.json` or `$POINTY_SETTINGS`
//! 3. **Environment variables**: `POINTY_*` overrides
//!
//! The result is passed explicitly into every component that needs it.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
