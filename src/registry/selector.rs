//! Programmer and tool selector resolution
//!
//! A selector is either a bare name (`usbasp`), resolved against the
//! currently active platform, or `package:name` (`arduino:avrispv2`),
//! resolved against the platform of that package with the active
//! platform's architecture.

use preflight_config::ConfigMap;
use serde::Serialize;
use tracing::debug;

use super::{DefinitionRegistry, Platform, PlatformId};

/// Separator between package and local name in a selector
pub const SELECTOR_SEPARATOR: char = ':';

/// Which definition set a selector names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionNamespace {
    Programmer,
    Tool,
}

impl DefinitionNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            DefinitionNamespace::Programmer => "programmer",
            DefinitionNamespace::Tool => "tool",
        }
    }
}

/// Selector resolution errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectorError {
    #[error("unknown platform: package '{package}' has no '{architecture}' platform installed")]
    UnknownPlatform {
        package: String,
        architecture: String,
    },

    #[error("unknown programmer '{selector}' (platform {platform})")]
    UnknownProgrammer { selector: String, platform: String },

    #[error("unknown tool '{selector}' (platform {platform})")]
    UnknownTool { selector: String, platform: String },

    #[error("unknown board '{board}' (platform {platform})")]
    UnknownBoard { board: String, platform: String },

    #[error("invalid board selector '{selector}', expected package:architecture:board")]
    InvalidBoardSelector { selector: String },
}

/// A selector split into its parts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selector<'a> {
    pub package: Option<&'a str>,
    pub name: &'a str,
}

/// Split `raw` at the first separator.
pub fn parse_selector(raw: &str) -> Selector<'_> {
    match raw.split_once(SELECTOR_SEPARATOR) {
        Some((package, name)) => Selector {
            package: Some(package),
            name,
        },
        None => Selector {
            package: None,
            name: raw,
        },
    }
}

/// A fully qualified board, `package:architecture:board`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardSelector<'a> {
    pub package: &'a str,
    pub architecture: &'a str,
    pub board: &'a str,
}

/// Split a fully qualified board name; every part must be non-empty.
pub fn parse_board_selector(raw: &str) -> Result<BoardSelector<'_>, SelectorError> {
    let mut parts = raw.splitn(3, SELECTOR_SEPARATOR);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(package), Some(architecture), Some(board))
            if !package.is_empty() && !architecture.is_empty() && !board.is_empty() =>
        {
            Ok(BoardSelector {
                package,
                architecture,
                board,
            })
        }
        _ => Err(SelectorError::InvalidBoardSelector {
            selector: raw.to_string(),
        }),
    }
}

/// Platform context and local name for a selector
#[derive(Debug, Clone, Copy)]
pub struct ResolvedSelector<'r> {
    pub platform: &'r Platform,
    pub name: &'r str,
    /// True when the selector named its package explicitly
    pub qualified: bool,
}

/// Resolve `raw` to `(platform, local name)`.
pub fn resolve_selector<'r, R>(
    raw: &'r str,
    current: &'r Platform,
    registry: &'r R,
) -> Result<ResolvedSelector<'r>, SelectorError>
where
    R: DefinitionRegistry + ?Sized,
{
    let selector = parse_selector(raw);
    match selector.package {
        Some(package) => {
            let platform = registry
                .platform(package, &current.id.architecture)
                .ok_or_else(|| SelectorError::UnknownPlatform {
                    package: package.to_string(),
                    architecture: current.id.architecture.clone(),
                })?;
            Ok(ResolvedSelector {
                platform,
                name: selector.name,
                qualified: true,
            })
        }
        None => Ok(ResolvedSelector {
            platform: current,
            name: selector.name,
            qualified: false,
        }),
    }
}

/// A definition found through a selector
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedDefinition {
    pub namespace: DefinitionNamespace,
    /// The selector as written
    pub selector: String,
    /// Platform the definition was taken from
    pub platform: PlatformId,
    /// Local name inside that platform
    pub name: String,
    #[serde(skip)]
    pub prefs: ConfigMap,
}

/// Resolve a selector and fetch its definition from `namespace`.
///
/// For tools, a package-qualified selector takes the referenced platform's
/// definition and overlays the active platform's definition of the same
/// name, so a core can adjust a tool it borrows from another package.
pub fn resolve_definition<R>(
    raw: &str,
    current: &Platform,
    registry: &R,
    namespace: DefinitionNamespace,
) -> Result<ResolvedDefinition, SelectorError>
where
    R: DefinitionRegistry + ?Sized,
{
    let resolved = resolve_selector(raw, current, registry)?;

    let mut prefs = resolved.platform.definition(namespace, resolved.name);
    if namespace == DefinitionNamespace::Tool && resolved.qualified {
        if let Some(local) = current.definition(namespace, resolved.name) {
            prefs.get_or_insert_with(ConfigMap::new).extend_from(&local);
        }
    }

    let prefs = match prefs {
        Some(prefs) if !resolved.name.is_empty() => prefs,
        _ => {
            let platform = resolved.platform.id.to_string();
            let selector = raw.to_string();
            return Err(match namespace {
                DefinitionNamespace::Programmer => SelectorError::UnknownProgrammer { selector, platform },
                DefinitionNamespace::Tool => SelectorError::UnknownTool { selector, platform },
            });
        }
    };

    debug!(
        namespace = namespace.as_str(),
        selector = raw,
        platform = %resolved.platform.id,
        keys = prefs.len(),
        "resolved definition"
    );

    Ok(ResolvedDefinition {
        namespace,
        selector: raw.to_string(),
        platform: resolved.platform.id.clone(),
        name: resolved.name.to_string(),
        prefs,
    })
}
