//! Hardware-folder registry
//!
//! Scans hardware roots laid out as `<root>/<package>/<arch>/` where each
//! platform folder holds `platform.txt`, `programmers.txt` and `boards.txt`
//! (all optional, but at least one must exist for the folder to count).
//! When two roots define the same platform, the later root wins.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use preflight_config::{load_properties, ConfigMap, PropertiesError};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::{DefinitionRegistry, Platform, PlatformId};

const PLATFORM_FILE: &str = "platform.txt";
const PROGRAMMERS_FILE: &str = "programmers.txt";
const BOARDS_FILE: &str = "boards.txt";

/// Errors loading hardware folders
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("hardware folder not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to scan {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error(transparent)]
    Properties(#[from] PropertiesError),
}

/// Registry backed by one or more hardware folders
#[derive(Debug, Clone, Default)]
pub struct HardwareRegistry {
    roots: Vec<PathBuf>,
    platforms: BTreeMap<PlatformId, Platform>,
}

impl HardwareRegistry {
    /// Scan `roots` in order.
    pub fn load<P: AsRef<Path>>(roots: &[P]) -> Result<Self, HardwareError> {
        let mut registry = Self::default();
        for root in roots {
            registry.add_root(root.as_ref())?;
        }
        info!(
            roots = registry.roots.len(),
            platforms = registry.platforms.len(),
            "loaded hardware definitions"
        );
        Ok(registry)
    }

    /// Scan one more root; its platforms replace same-id platforms.
    pub fn add_root(&mut self, root: &Path) -> Result<(), HardwareError> {
        if !root.is_dir() {
            return Err(HardwareError::NotFound(root.to_path_buf()));
        }

        let walker = WalkDir::new(root)
            .min_depth(2)
            .max_depth(2)
            .follow_links(true)
            .sort_by_file_name();

        for entry in walker {
            let entry = entry.map_err(|source| HardwareError::Walk {
                path: root.to_path_buf(),
                source,
            })?;
            if !entry.file_type().is_dir() {
                continue;
            }
            if let Some(platform) = load_platform(entry.path())? {
                debug!(platform = %platform.id, folder = %entry.path().display(), "found platform");
                self.platforms.insert(platform.id.clone(), platform);
            }
        }

        self.roots.push(root.to_path_buf());
        Ok(())
    }
}

impl DefinitionRegistry for HardwareRegistry {
    fn platform(&self, package: &str, architecture: &str) -> Option<&Platform> {
        self.platforms.get(&PlatformId::new(package, architecture))
    }

    fn platforms(&self) -> Vec<&Platform> {
        self.platforms.values().collect()
    }
}

/// Load a `<package>/<arch>` folder, or `None` if it has no definition files.
fn load_platform(folder: &Path) -> Result<Option<Platform>, HardwareError> {
    let (Some(arch), Some(package)) = (
        folder.file_name().and_then(|n| n.to_str()),
        folder
            .parent()
            .and_then(Path::file_name)
            .and_then(|n| n.to_str()),
    ) else {
        return Ok(None);
    };

    let properties = load_optional(&folder.join(PLATFORM_FILE))?;
    let programmers = load_optional(&folder.join(PROGRAMMERS_FILE))?;
    let boards = load_optional(&folder.join(BOARDS_FILE))?;
    if properties.is_none() && programmers.is_none() && boards.is_none() {
        return Ok(None);
    }

    let mut platform = Platform::new(PlatformId::new(package, arch));
    platform.folder = Some(folder.to_path_buf());
    platform.properties = properties.unwrap_or_default();
    platform.programmers = programmers.map(|p| p.first_level()).unwrap_or_default();
    platform.boards = boards
        .map(|b| {
            let mut groups = b.first_level();
            // `menu.*` declares option menus, not a board.
            groups.remove("menu");
            groups
        })
        .unwrap_or_default();
    Ok(Some(platform))
}

fn load_optional(path: &Path) -> Result<Option<ConfigMap>, HardwareError> {
    if path.is_file() {
        Ok(Some(load_properties(path)?))
    } else {
        Ok(None)
    }
}
