//! Tool settings
//!
//! Settings are merged from three layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. User settings file (~/.config/burn-preflight/config.toml)
//! 3. CLI flags

mod defaults;
mod effective;
mod merge;

pub use defaults::{
    FilterSettings, FilterValidationError, PreflightSettings, DEFAULT_DENY_PATTERN,
};
pub use effective::{
    default_settings_path, EffectiveSettings, SettingsError, SettingsOrigin, SettingsSource,
    SCHEMA_ID,
};
pub use merge::{deep_merge, merge_layers};
