//! Flat string configuration map.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A required configuration key was not present.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("missing required configuration key '{key}'")]
pub struct MissingConfigKey {
    pub key: String,
}

impl MissingConfigKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// Flat mapping of dotted keys to string values.
///
/// Keys are unique; inserting an existing key overwrites its value.
/// Iteration order is sorted by key so dumps are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigMap {
    entries: BTreeMap<String, String>,
}

impl ConfigMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a key, returning `None` when absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Look up a key that must be present.
    pub fn get_required(&self, key: &str) -> Result<&str, MissingConfigKey> {
        self.get(key).ok_or_else(|| MissingConfigKey::new(key))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert a value, returning the previous one if the key existed.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    /// Copy every entry of `other` into `self`, overwriting duplicates.
    pub fn extend_from(&mut self, other: &ConfigMap) {
        for (key, value) in &other.entries {
            self.entries.insert(key.clone(), value.clone());
        }
    }

    /// Copy `source` into `target`, failing if `source` is absent.
    pub fn alias_required(&mut self, target: &str, source: &str) -> Result<(), MissingConfigKey> {
        let value = self.get_required(source)?.to_string();
        self.insert(target, value);
        Ok(())
    }

    /// Entries below `prefix.`, with the prefix stripped.
    ///
    /// `sub_tree("tools.avrdude")` turns `tools.avrdude.cmd.path` into
    /// `cmd.path`. The bare `prefix` key itself is not included.
    pub fn sub_tree(&self, prefix: &str) -> ConfigMap {
        let lead = format!("{}.", prefix);
        self.entries
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(&lead)
                    .filter(|rest| !rest.is_empty())
                    .map(|rest| (rest.to_string(), value.clone()))
            })
            .collect()
    }

    /// Group `a.b.c=v` entries by their first segment into `a -> {b.c=v}`.
    ///
    /// Keys without a dot have no second level and are skipped.
    pub fn first_level(&self) -> BTreeMap<String, ConfigMap> {
        let mut groups: BTreeMap<String, ConfigMap> = BTreeMap::new();
        for (key, value) in &self.entries {
            if let Some((head, rest)) = key.split_once('.') {
                if head.is_empty() || rest.is_empty() {
                    continue;
                }
                groups
                    .entry(head.to_string())
                    .or_default()
                    .insert(rest, value.clone());
            }
        }
        groups
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl FromIterator<(String, String)> for ConfigMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for ConfigMap {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

impl<const N: usize> From<[(&str, &str); N]> for ConfigMap {
    fn from(pairs: [(&str, &str); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl IntoIterator for ConfigMap {
    type Item = (String, String);
    type IntoIter = std::collections::btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
