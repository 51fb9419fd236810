//! On-disk inputs of a preflight: the global preferences file and the
//! hardware roots named by the settings.

use preflight_config::{load_properties, ConfigMap, PropertiesError};
use tracing::debug;

use crate::registry::{HardwareError, HardwareRegistry};
use crate::settings::PreflightSettings;

#[derive(Debug, thiserror::Error)]
pub enum EnvironmentError {
    #[error("no preferences file configured (set `preferences` in the settings file or pass --preferences)")]
    NoPreferences,

    #[error("no hardware folders configured (set `hardware` in the settings file or pass --hardware)")]
    NoHardware,

    #[error("failed to load preferences: {0}")]
    Preferences(#[from] PropertiesError),

    #[error("failed to load hardware definitions: {0}")]
    Hardware(#[from] HardwareError),
}

/// Global preferences plus the platform definitions they refer to
#[derive(Debug, Clone)]
pub struct Environment {
    pub preferences: ConfigMap,
    pub registry: HardwareRegistry,
}

impl Environment {
    pub fn load(settings: &PreflightSettings) -> Result<Self, EnvironmentError> {
        let path = settings
            .preferences
            .as_deref()
            .ok_or(EnvironmentError::NoPreferences)?;
        if settings.hardware.is_empty() {
            return Err(EnvironmentError::NoHardware);
        }

        let preferences = load_properties(path)?;
        debug!(path = %path.display(), keys = preferences.len(), "loaded preferences");
        let registry = HardwareRegistry::load(&settings.hardware)?;

        Ok(Self {
            preferences,
            registry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DefinitionRegistry;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_from_settings() {
        let dir = TempDir::new().unwrap();
        let prefs = dir.path().join("preferences.txt");
        fs::write(&prefs, "target_package=cestino\ntarget_platform=avr\n").unwrap();
        let avr = dir.path().join("hardware/cestino/avr");
        fs::create_dir_all(&avr).unwrap();
        fs::write(avr.join("programmers.txt"), "usbasp.protocol=usbasp\n").unwrap();

        let settings = PreflightSettings {
            preferences: Some(prefs),
            hardware: vec![dir.path().join("hardware")],
            ..PreflightSettings::default()
        };
        let env = Environment::load(&settings).unwrap();
        assert_eq!(env.preferences.get("target_package"), Some("cestino"));
        assert!(env.registry.platform("cestino", "avr").is_some());
    }

    #[test]
    fn test_preferences_required() {
        let err = Environment::load(&PreflightSettings::default()).unwrap_err();
        assert!(matches!(err, EnvironmentError::NoPreferences));
    }

    #[test]
    fn test_missing_preferences_file() {
        let dir = TempDir::new().unwrap();
        let settings = PreflightSettings {
            preferences: Some(dir.path().join("missing.txt")),
            hardware: vec![dir.path().to_path_buf()],
            ..PreflightSettings::default()
        };
        let err = Environment::load(&settings).unwrap_err();
        assert!(matches!(err, EnvironmentError::Preferences(_)));
        assert!(err.to_string().contains("missing.txt"));
    }
}
