//! # preapi-settings
//!
//! Configuration management with layered sources for the pre-api distributor.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`PreApiSettings::default()`]
//! 2. **Settings file**: `~/.preapi/settings.json`, or the path in
//!    `PREAPI_SETTINGS` (deep-merged over defaults)
//! 3. **Environment variables**: `PREAPI_*` overrides plus the legacy
//!    `FLIP_REDIS_OPTIONS` / `REDIS_FLIP_INSTANCES` endpoint variables
//!
//! Unlike a process-wide singleton, the loaded value is passed explicitly to
//! every component that needs it, so tests can run several independently
//! configured instances in one process.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
