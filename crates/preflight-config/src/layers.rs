//! Ordered layer merge
//!
//! Layers are applied first to last; a key in a later layer replaces the
//! same key from any earlier layer. A layer whose map is `None` (for example
//! when no board is selected) is skipped.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ConfigMap;

/// A named configuration layer that may be absent.
#[derive(Debug, Clone)]
pub struct Layer {
    pub name: String,
    pub map: Option<ConfigMap>,
}

impl Layer {
    pub fn present(name: impl Into<String>, map: ConfigMap) -> Self {
        Self {
            name: name.into(),
            map: Some(map),
        }
    }

    pub fn absent(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            map: None,
        }
    }

    pub fn optional(name: impl Into<String>, map: Option<ConfigMap>) -> Self {
        Self {
            name: name.into(),
            map,
        }
    }
}

/// Provenance entry for one layer that took part in a resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSource {
    /// Layer name as given by the caller
    pub name: String,

    /// Whether the layer was present
    pub present: bool,

    /// Number of keys the layer carried
    pub keys: usize,

    /// Number of keys from earlier layers it replaced
    pub overridden: usize,
}

/// Merged configuration plus per-layer provenance
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub map: ConfigMap,
    pub sources: Vec<LayerSource>,
}

/// Merge `layers` in order into one flat map.
pub fn resolve(layers: &[Layer]) -> ResolvedConfig {
    let mut map = ConfigMap::new();
    let mut sources = Vec::with_capacity(layers.len());

    for layer in layers {
        let Some(layer_map) = &layer.map else {
            debug!(layer = %layer.name, "skipping absent configuration layer");
            sources.push(LayerSource {
                name: layer.name.clone(),
                present: false,
                keys: 0,
                overridden: 0,
            });
            continue;
        };

        let mut overridden = 0;
        for (key, value) in layer_map.iter() {
            if map.insert(key, value).is_some() {
                overridden += 1;
            }
        }
        debug!(
            layer = %layer.name,
            keys = layer_map.len(),
            overridden,
            "applied configuration layer"
        );
        sources.push(LayerSource {
            name: layer.name.clone(),
            present: true,
            keys: layer_map.len(),
            overridden,
        });
    }

    ResolvedConfig { map, sources }
}
