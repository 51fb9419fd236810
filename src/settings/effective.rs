//! Effective settings with provenance
//!
//! Records which layers contributed to the merged settings and the SHA-256
//! of the settings file that was read, so a report can say exactly which
//! configuration produced it.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::defaults::{FilterValidationError, PreflightSettings};
use super::merge::merge_layers;
use crate::timeout::TimeoutValidationError;

/// Schema identifier
pub const SCHEMA_ID: &str = "burn-preflight/effective_settings@1";

/// Origin of a settings layer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SettingsOrigin {
    Builtin,
    File,
    Cli,
}

/// A contributing settings layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SettingsSource {
    pub origin: SettingsOrigin,

    /// File path (file layer only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 of the raw file bytes (file layer only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Settings after merging, with where they came from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveSettings {
    pub schema_id: String,

    pub created_at: DateTime<Utc>,

    pub settings: PreflightSettings,

    /// Contributing layers, lowest precedence first
    pub sources: Vec<SettingsSource>,
}

/// Settings errors
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("invalid settings: {0}")]
    Invalid(String),

    #[error(transparent)]
    Timeouts(#[from] TimeoutValidationError),

    #[error(transparent)]
    Filter(#[from] FilterValidationError),
}

/// `$XDG_CONFIG_HOME/burn-preflight/config.toml`, falling back to
/// `$HOME/.config/burn-preflight/config.toml`.
pub fn default_settings_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))?;
    Some(base.join("burn-preflight").join("config.toml"))
}

impl EffectiveSettings {
    /// Merge builtin defaults, the settings file (skipped when `file` does
    /// not exist) and CLI overrides, then validate the result.
    pub fn build(file: Option<&Path>, cli_overrides: Option<Value>) -> Result<Self, SettingsError> {
        let builtin = serde_json::to_value(PreflightSettings::default())
            .map_err(|e| SettingsError::Invalid(e.to_string()))?;
        let mut layers = vec![builtin];
        let mut sources = vec![SettingsSource {
            origin: SettingsOrigin::Builtin,
            path: None,
            digest: None,
        }];

        if let Some(path) = file.filter(|p| p.exists()) {
            let (value, digest) = load_toml_file(path)?;
            debug!(path = %path.display(), digest = %digest, "loaded settings file");
            layers.push(value);
            sources.push(SettingsSource {
                origin: SettingsOrigin::File,
                path: Some(path.to_string_lossy().into_owned()),
                digest: Some(digest),
            });
        }

        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(SettingsSource {
                origin: SettingsOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let settings: PreflightSettings = serde_json::from_value(merge_layers(layers))
            .map_err(|e| SettingsError::Invalid(e.to_string()))?;
        settings.timeouts.validate()?;
        settings.filter.validate()?;

        Ok(Self {
            schema_id: SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            settings,
            sources,
        })
    }

    /// Like [`EffectiveSettings::build`], but an explicitly named file must
    /// exist. Without one, the default settings path is used if present.
    pub fn load(explicit: Option<&Path>, cli_overrides: Option<Value>) -> Result<Self, SettingsError> {
        match explicit {
            Some(path) if !path.exists() => Err(SettingsError::NotFound(path.to_path_buf())),
            Some(path) => Self::build(Some(path), cli_overrides),
            None => Self::build(default_settings_path().as_deref(), cli_overrides),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn load_toml_file(path: &Path) -> Result<(Value, String), SettingsError> {
    let bytes = fs::read(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let digest = hex::encode(Sha256::digest(&bytes));

    let parse_error = |message: String| SettingsError::Parse {
        path: path.to_path_buf(),
        message,
    };
    let contents = String::from_utf8(bytes).map_err(|e| parse_error(format!("invalid UTF-8: {}", e)))?;
    let value: Value = toml::from_str(&contents).map_err(|e| parse_error(e.to_string()))?;

    Ok((value, digest))
}
