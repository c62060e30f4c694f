//! # diag-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** ([`DiagSettings::default()`])
//! 2. **User file** `~/.hot-diagnose/settings.json`, deep-merged over defaults
//! 3. **Environment variables** `HOT_DIAGNOSE_*` (highest priority)
//!
//! Command-line flags are applied on top by the binary.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, home_dir, load_settings,
    load_settings_from_path, settings_path, validate, MAX_CALL_DEPTH,
};
pub use types::*;
