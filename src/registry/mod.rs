//! Platform, board, programmer and tool definitions
//!
//! A platform is identified by `(package, architecture)` and carries three
//! definition sets, mirroring an Arduino hardware folder:
//! - `platform.txt`: platform properties, including `tools.<name>.*`
//! - `programmers.txt`: `<programmer>.*`
//! - `boards.txt`: `<board>.*`
//!
//! The registry is read-only; lookups that fail are reported by the
//! selector layer as `UnknownPlatform` / `UnknownProgrammer` / `UnknownTool`.

mod hardware;
mod selector;

pub use hardware::{HardwareError, HardwareRegistry};
pub use selector::{
    parse_board_selector, parse_selector, resolve_definition, resolve_selector, BoardSelector,
    DefinitionNamespace, ResolvedDefinition, ResolvedSelector, Selector, SelectorError,
    SELECTOR_SEPARATOR,
};

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use preflight_config::ConfigMap;
use serde::{Deserialize, Serialize};

/// Identity of a platform
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlatformId {
    pub package: String,
    pub architecture: String,
}

impl PlatformId {
    pub fn new(package: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            architecture: architecture.into(),
        }
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.package, self.architecture)
    }
}

/// One platform's definitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub id: PlatformId,

    /// Platform folder on disk, when loaded from a hardware root
    pub folder: Option<PathBuf>,

    /// `platform.txt`
    pub properties: ConfigMap,

    /// `programmers.txt`, grouped by programmer name
    pub programmers: BTreeMap<String, ConfigMap>,

    /// `boards.txt`, grouped by board id
    pub boards: BTreeMap<String, ConfigMap>,
}

impl Platform {
    pub fn new(id: PlatformId) -> Self {
        Self {
            id,
            folder: None,
            properties: ConfigMap::new(),
            programmers: BTreeMap::new(),
            boards: BTreeMap::new(),
        }
    }

    pub fn with_properties(mut self, properties: ConfigMap) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_programmer(mut self, name: impl Into<String>, prefs: ConfigMap) -> Self {
        self.programmers.insert(name.into(), prefs);
        self
    }

    pub fn with_board(mut self, id: impl Into<String>, prefs: ConfigMap) -> Self {
        self.boards.insert(id.into(), prefs);
        self
    }

    pub fn programmer(&self, name: &str) -> Option<ConfigMap> {
        self.programmers.get(name).cloned()
    }

    /// `tools.<name>.*` from the platform properties; `None` when empty.
    pub fn tool(&self, name: &str) -> Option<ConfigMap> {
        let prefs = self.properties.sub_tree(&format!("tools.{}", name));
        (!prefs.is_empty()).then_some(prefs)
    }

    /// `runtime.platform.path` and `runtime.hardware.path`; empty when the
    /// platform was not loaded from disk.
    pub fn runtime_prefs(&self) -> ConfigMap {
        let mut prefs = ConfigMap::new();
        if let Some(folder) = &self.folder {
            prefs.insert("runtime.platform.path", folder.to_string_lossy());
            if let Some(hardware) = folder.parent() {
                prefs.insert("runtime.hardware.path", hardware.to_string_lossy());
            }
        }
        prefs
    }

    /// Board preferences, with the platform's runtime paths added.
    pub fn board(&self, id: &str) -> Option<ConfigMap> {
        let mut prefs = self.boards.get(id)?.clone();
        prefs.extend_from(&self.runtime_prefs());
        Some(prefs)
    }

    /// Look up a definition by namespace.
    pub fn definition(&self, namespace: DefinitionNamespace, name: &str) -> Option<ConfigMap> {
        match namespace {
            DefinitionNamespace::Programmer => self.programmer(name),
            DefinitionNamespace::Tool => self.tool(name),
        }
    }
}

/// Read-only source of platform definitions
pub trait DefinitionRegistry {
    /// Platform for `package` and `architecture`, if installed.
    fn platform(&self, package: &str, architecture: &str) -> Option<&Platform>;

    /// Every installed platform, sorted by id.
    fn platforms(&self) -> Vec<&Platform>;
}

/// In-memory registry
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    platforms: BTreeMap<PlatformId, Platform>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.insert(platform);
        self
    }

    pub fn insert(&mut self, platform: Platform) {
        self.platforms.insert(platform.id.clone(), platform);
    }
}

impl DefinitionRegistry for StaticRegistry {
    fn platform(&self, package: &str, architecture: &str) -> Option<&Platform> {
        self.platforms.get(&PlatformId::new(package, architecture))
    }

    fn platforms(&self) -> Vec<&Platform> {
        self.platforms.values().collect()
    }
}
