//! Layered key/value configuration for programmer invocations.
//!
//! A [`ConfigMap`] is a flat map of dotted keys (`bootloader.tool`,
//! `erase.params.verbose`, ...) to string values. Maps are built by loading
//! Arduino-style properties files and by merging ordered [`Layer`]s, where
//! later layers override earlier ones and absent layers are skipped.

mod layers;
mod map;
mod properties;

pub use layers::{resolve, Layer, LayerSource, ResolvedConfig};
pub use map::{ConfigMap, MissingConfigKey};
pub use properties::{
    apply_os_suffixes, current_os_suffix, load_properties, parse_properties, PropertiesError,
};
