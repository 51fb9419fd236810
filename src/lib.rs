//! Bootloader burn preflight
//!
//! Re-derives the programmer invocation a bootloader burn would use, removes
//! its destructive trailing actions (write bootloader, write lock fuse) and
//! runs the rest, so the target's signature and fuses are read and checked
//! without writing anything.

pub mod environment;
pub mod preflight;
pub mod registry;
pub mod settings;
pub mod signal;
pub mod timeout;

pub use environment::{Environment, EnvironmentError};
pub use preflight::{
    ExitCode, FailureKind, Preflight, PreflightError, PreflightPlan, PreflightReport,
    PreflightRequest, PreflightState, Resolution, Stage,
};
pub use registry::{DefinitionRegistry, HardwareRegistry, Platform, PlatformId, StaticRegistry};
pub use settings::{EffectiveSettings, PreflightSettings, SettingsError};
