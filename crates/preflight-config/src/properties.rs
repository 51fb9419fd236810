//! Arduino-style properties files (`platform.txt`, `boards.txt`,
//! `programmers.txt`, `preferences.txt`).
//!
//! Format: one `key=value` per line, split at the first `=`. Lines are
//! trimmed; blank lines, `#` comments and lines without `=` are ignored.
//! Keys ending in an OS suffix (`.linux`, `.macosx`, `.windows`) override
//! the unsuffixed key on that OS and are dropped on the others.

use std::fs;
use std::path::{Path, PathBuf};

use crate::ConfigMap;

const OS_SUFFIXES: &[&str] = &["linux", "macosx", "windows"];

/// Errors loading a properties file
#[derive(Debug, thiserror::Error)]
pub enum PropertiesError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Parse properties text without applying OS suffixes.
pub fn parse_properties(text: &str) -> ConfigMap {
    let mut map = ConfigMap::new();
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            map.insert(key, value.trim());
        }
    }
    map
}

/// Fold OS-suffixed keys for `os` into their base keys.
///
/// `os` is one of `linux`, `macosx`, `windows`.
pub fn apply_os_suffixes(map: ConfigMap, os: &str) -> ConfigMap {
    let mut base = ConfigMap::new();
    let mut specific = ConfigMap::new();

    for (key, value) in map {
        match key.rsplit_once('.') {
            Some((stem, suffix)) if OS_SUFFIXES.contains(&suffix) => {
                if suffix == os {
                    specific.insert(stem, value);
                }
            }
            _ => {
                base.insert(key, value);
            }
        }
    }

    base.extend_from(&specific);
    base
}

/// Name of the running OS in properties-suffix form
pub fn current_os_suffix() -> &'static str {
    if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "macos") {
        "macosx"
    } else {
        "linux"
    }
}

/// Read and parse a properties file, applying suffixes for the running OS.
pub fn load_properties(path: &Path) -> Result<ConfigMap, PropertiesError> {
    let text = fs::read_to_string(path).map_err(|source| PropertiesError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(apply_os_suffixes(parse_properties(&text), current_os_suffix()))
}
