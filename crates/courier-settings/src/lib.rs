//! # courier-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`CourierSettings::default()`]
//! 2. **Settings file**: `$COURIER_CONFIG` or `~/.courier/settings.json`
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `PORT`, `WEBHOOK_URL`, `SESSION_PATH` and
//!    friends (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
