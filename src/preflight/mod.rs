//! Preflight orchestration
//!
//! Resolves the layered configuration for the selected board, programmer and
//! bootloader tool, expands `bootloader.pattern` into the command the burn
//! would run, strips its destructive trailing actions and runs what is left.
//! Every stage is tracked by the [`state`] machine and recorded in the
//! [`PreflightReport`].

mod error;
mod report;
mod state;

pub use error::{ErrorKind, ExitCode, FailureKind, PreflightError, Stage, EXIT_CANCELLED};
pub use report::{FailureSummary, PreflightReport, PreflightStatus, REPORT_SCHEMA_ID};
pub use state::{PreflightState, StateChange, StateError, StateTracker};

use preflight_command::{expand, render_command, CommandFilter, FilterError};
use preflight_config::{resolve, ConfigMap, Layer, LayerSource, ResolvedConfig};
use preflight_runner::{CancelToken, LineConsumer, Runner};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::registry::{
    parse_board_selector, resolve_definition, DefinitionNamespace, DefinitionRegistry, PlatformId,
    ResolvedDefinition, SelectorError,
};
use crate::settings::PreflightSettings;

/// Global preference naming the active package
pub const TARGET_PACKAGE_KEY: &str = "target_package";
/// Global preference naming the active architecture
pub const TARGET_PLATFORM_KEY: &str = "target_platform";
/// Global preference naming the active board
pub const BOARD_KEY: &str = "board";
/// Global preference naming the selected programmer
pub const PROGRAMMER_KEY: &str = "programmer";
/// Key (from board or programmer) naming the bootloader tool
pub const BOOTLOADER_TOOL_KEY: &str = "bootloader.tool";
/// Key (from the tool) holding the bootloader command template
pub const BOOTLOADER_PATTERN_KEY: &str = "bootloader.pattern";

/// `(target, group)`: `target` is set from `<group>.params.verbose` or
/// `<group>.params.quiet`
const VERBOSITY_ALIASES: [(&str, &str); 2] = [
    ("erase.verbose", "erase"),
    ("bootloader.verbose", "bootloader"),
];

/// Inputs of one preflight
#[derive(Debug, Clone)]
pub struct PreflightRequest {
    /// Global preferences (`preferences.txt`)
    pub preferences: ConfigMap,

    /// `package:architecture:board`, replacing the active selection
    pub board: Option<String>,

    /// Programmer selector, replacing the `programmer` preference
    pub programmer: Option<String>,

    /// Applied after every other layer
    pub overrides: ConfigMap,

    /// Use the `.params.verbose` variants instead of `.params.quiet`
    pub verbose: bool,
}

impl PreflightRequest {
    pub fn new(preferences: ConfigMap) -> Self {
        Self {
            preferences,
            board: None,
            programmer: None,
            overrides: ConfigMap::new(),
            verbose: true,
        }
    }

    pub fn with_board(mut self, board: impl Into<String>) -> Self {
        self.board = Some(board.into());
        self
    }

    pub fn with_programmer(mut self, programmer: impl Into<String>) -> Self {
        self.programmer = Some(programmer.into());
        self
    }

    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(key, value);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// Output of the resolve stage
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub platform: PlatformId,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub board: Option<String>,

    pub programmer: ResolvedDefinition,

    pub tool: ResolvedDefinition,

    /// The merged configuration map
    #[serde(skip)]
    pub config: ConfigMap,

    /// Contributing layers in merge order
    pub layers: Vec<LayerSource>,
}

/// Everything up to, but not including, running the command
#[derive(Debug, Clone, Serialize)]
pub struct PreflightPlan {
    #[serde(flatten)]
    pub resolution: Resolution,

    /// `bootloader.pattern` before expansion
    pub pattern: String,

    /// Command as the burn would run it
    pub full_command: Vec<String>,

    /// Command with the destructive actions removed
    pub command: Vec<String>,

    /// Arguments the filter removed
    pub removed: Vec<String>,
}

/// Tracks state and the report while a preflight is in progress.
struct Session {
    tracker: StateTracker,
    report: PreflightReport,
}

impl Session {
    fn new() -> Self {
        Self {
            tracker: StateTracker::new(),
            report: PreflightReport::new(),
        }
    }

    fn advance(&mut self, stage: Stage, target: PreflightState) -> Result<(), PreflightError> {
        match self.tracker.transition(target) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(stage, e.into())),
        }
    }

    fn fail(&mut self, stage: Stage, kind: ErrorKind) -> PreflightError {
        if let Err(e) = self.tracker.transition(PreflightState::Failed) {
            debug!(error = %e, "preflight already finished");
        }
        let subkind = match &kind {
            ErrorKind::Run(e) => report::timeout_subkind(e),
            _ => None,
        };
        let failure = FailureSummary {
            stage,
            kind: kind.failure_kind(),
            subkind,
            message: kind.to_string(),
        };
        warn!(
            run_id = %self.report.run_id,
            stage = stage.as_str(),
            error = %kind,
            "preflight failed"
        );
        self.report.fail(failure, self.tracker.history());
        PreflightError::new(stage, kind, self.report.clone())
    }
}

/// Runs preflights against one definition registry.
pub struct Preflight<'r, R: ?Sized> {
    registry: &'r R,
    filter: CommandFilter,
    runner: Runner,
}

impl<'r, R> Preflight<'r, R>
where
    R: DefinitionRegistry + ?Sized,
{
    pub fn new(registry: &'r R, filter: CommandFilter, runner: Runner) -> Self {
        Self {
            registry,
            filter,
            runner,
        }
    }

    /// Build filter and runner from tool settings.
    pub fn from_settings(
        registry: &'r R,
        settings: &PreflightSettings,
        cancel: CancelToken,
    ) -> Result<Self, FilterError> {
        let filter = CommandFilter::new(settings.filter.policy(), &settings.filter.deny)?;
        let runner = Runner::new(settings.timeouts.to_run_options(cancel));
        Ok(Self::new(registry, filter, runner))
    }

    /// Merge the configuration layers only.
    pub fn resolve(&self, request: &PreflightRequest) -> Result<Resolution, PreflightError> {
        let mut session = Session::new();
        self.resolve_stage(request, &mut session)
    }

    /// Resolve, expand and filter without running anything.
    pub fn plan(&self, request: &PreflightRequest) -> Result<PreflightPlan, PreflightError> {
        let mut session = Session::new();
        self.plan_stages(request, &mut session)
    }

    /// Full preflight: plan, then run the filtered command, streaming its
    /// output to `consumer`. No stage is retried.
    pub fn run<C>(
        &self,
        request: &PreflightRequest,
        consumer: &mut C,
    ) -> Result<PreflightReport, PreflightError>
    where
        C: LineConsumer + ?Sized,
    {
        let mut session = Session::new();
        info!(run_id = %session.report.run_id, "starting preflight");

        let plan = self.plan_stages(request, &mut session)?;
        session.advance(Stage::Run, PreflightState::Running)?;
        info!(command = %render_command(&plan.command), "running device check");

        match self.runner.run(&plan.command, consumer) {
            Ok(result) => {
                info!(
                    duration_ms = result.duration.as_millis() as u64,
                    "device check passed"
                );
                session.report.execution = Some(result);
                session.advance(Stage::Run, PreflightState::Succeeded)?;
                session.report.succeed(session.tracker.history());
                Ok(session.report)
            }
            Err(e) => {
                session.report.execution = e.result().cloned();
                Err(session.fail(Stage::Run, e.into()))
            }
        }
    }

    fn plan_stages(
        &self,
        request: &PreflightRequest,
        session: &mut Session,
    ) -> Result<PreflightPlan, PreflightError> {
        let resolution = self.resolve_stage(request, session)?;

        let pattern = match resolution.config.get_required(BOOTLOADER_PATTERN_KEY) {
            Ok(pattern) => pattern.to_string(),
            Err(e) => return Err(session.fail(Stage::Expand, e.into())),
        };
        let full_command = expand(&pattern, &resolution.config, true)
            .map_err(|e| session.fail(Stage::Expand, e.into()))?;
        session.report.full_command = full_command.clone();
        debug!(command = %render_command(&full_command), "expanded bootloader pattern");
        session.advance(Stage::Expand, PreflightState::CommandBuilt)?;

        let outcome = self
            .filter
            .apply(&full_command)
            .map_err(|e| session.fail(Stage::Filter, e.into()))?;
        session.report.command = outcome.command.clone();
        session.report.removed = outcome.removed.clone();
        debug!(removed = ?outcome.removed, "removed destructive actions");
        session.advance(Stage::Filter, PreflightState::CommandFiltered)?;

        Ok(PreflightPlan {
            resolution,
            pattern,
            full_command,
            command: outcome.command,
            removed: outcome.removed,
        })
    }

    fn resolve_stage(
        &self,
        request: &PreflightRequest,
        session: &mut Session,
    ) -> Result<Resolution, PreflightError> {
        let resolution = self
            .resolve_layers(request)
            .map_err(|kind| session.fail(Stage::Resolve, kind))?;

        let report = &mut session.report;
        report.platform = Some(resolution.platform.clone());
        report.board = resolution.board.clone();
        report.programmer = Some(resolution.programmer.clone());
        report.tool = Some(resolution.tool.clone());
        report.layers = resolution.layers.clone();

        session.advance(Stage::Resolve, PreflightState::ConfigResolved)?;
        Ok(resolution)
    }

    fn resolve_layers(&self, request: &PreflightRequest) -> Result<Resolution, ErrorKind> {
        let mut global = request.preferences.clone();
        if let Some(raw) = &request.board {
            let board = parse_board_selector(raw)?;
            global.insert(TARGET_PACKAGE_KEY, board.package);
            global.insert(TARGET_PLATFORM_KEY, board.architecture);
            global.insert(BOARD_KEY, board.board);
        }
        if let Some(programmer) = &request.programmer {
            global.insert(PROGRAMMER_KEY, programmer.as_str());
        }

        let package = global.get_required(TARGET_PACKAGE_KEY)?;
        let architecture = global.get_required(TARGET_PLATFORM_KEY)?;
        let current = self.registry.platform(package, architecture).ok_or_else(|| {
            SelectorError::UnknownPlatform {
                package: package.to_string(),
                architecture: architecture.to_string(),
            }
        })?;
        global.extend_from(&current.runtime_prefs());

        let board = global.get(BOARD_KEY).filter(|id| !id.is_empty());
        let board_prefs = match board {
            Some(id) => Some(current.board(id).ok_or_else(|| SelectorError::UnknownBoard {
                board: id.to_string(),
                platform: current.id.to_string(),
            })?),
            None => None,
        };

        let programmer = resolve_definition(
            global.get_required(PROGRAMMER_KEY)?,
            current,
            self.registry,
            DefinitionNamespace::Programmer,
        )?;

        let overrides = (!request.overrides.is_empty()).then(|| request.overrides.clone());

        // `bootloader.tool` comes from the board or programmer, never the tool itself.
        let selection = resolve(&[
            Layer::present("global", global.clone()),
            Layer::optional("board", board_prefs.clone()),
            Layer::present("programmer", programmer.prefs.clone()),
            Layer::optional("overrides", overrides.clone()),
        ]);
        let tool = resolve_definition(
            selection.map.get_required(BOOTLOADER_TOOL_KEY)?,
            current,
            self.registry,
            DefinitionNamespace::Tool,
        )?;

        let board = board.map(str::to_string);
        let platform = current.id.clone();
        let ResolvedConfig { mut map, sources } = resolve(&[
            Layer::present("global", global),
            Layer::optional("board", board_prefs),
            Layer::present("programmer", programmer.prefs.clone()),
            Layer::present("tool", tool.prefs.clone()),
            Layer::optional("overrides", overrides),
        ]);

        // An explicit override of the alias target wins over the params variant.
        let variant = if request.verbose { "verbose" } else { "quiet" };
        for (target, group) in VERBOSITY_ALIASES {
            if request.overrides.contains_key(target) {
                continue;
            }
            map.alias_required(target, &format!("{}.params.{}", group, variant))?;
        }

        info!(
            platform = %platform,
            board = board.as_deref().unwrap_or("-"),
            programmer = %programmer.selector,
            tool = %tool.selector,
            keys = map.len(),
            "resolved configuration"
        );

        Ok(Resolution {
            platform,
            board,
            programmer,
            tool,
            config: map,
            layers: sources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Platform, StaticRegistry};
    use preflight_command::FilterPolicy;
    use preflight_runner::{RunOptions, Stream};

    const PATTERN: &str = "\"{cmd.path}\" \"-C{config.path}\" {bootloader.verbose} -p{build.mcu} -c{protocol} {program.extra_params} \"-Uflash:w:{runtime.platform.path}/bootloaders/{bootloader.file}:i\" -Ulock:w:{bootloader.lock_bits}:m";

    fn registry(cmd_path: &str) -> StaticRegistry {
        let mut cestino = Platform::new(PlatformId::new("cestino", "avr"))
            .with_properties(ConfigMap::from([
                ("tools.avrdude.cmd.path", cmd_path),
                ("tools.avrdude.config.path", "/etc/avrdude.conf"),
                ("tools.avrdude.bootloader.params.verbose", "-v -v -v -v"),
                ("tools.avrdude.bootloader.params.quiet", "-q -q"),
                ("tools.avrdude.erase.params.verbose", "-v"),
                ("tools.avrdude.erase.params.quiet", "-q"),
                ("tools.avrdude.bootloader.pattern", PATTERN),
            ]))
            .with_programmer(
                "arduinoasisp",
                ConfigMap::from([
                    ("protocol", "stk500v1"),
                    ("program.extra_params", "-P/dev/ttyUSB0 -b19200"),
                ]),
            )
            .with_board(
                "cestino",
                ConfigMap::from([
                    ("build.mcu", "atmega1284p"),
                    ("bootloader.tool", "avrdude"),
                    ("bootloader.file", "optiboot/optiboot_atmega1284p.hex"),
                    ("bootloader.lock_bits", "0x0F"),
                ]),
            );
        cestino.folder = Some("/hw/cestino/avr".into());
        StaticRegistry::new().with_platform(cestino)
    }

    fn request() -> PreflightRequest {
        PreflightRequest::new(ConfigMap::from([
            ("target_package", "cestino"),
            ("target_platform", "avr"),
            ("board", "cestino"),
            ("programmer", "arduinoasisp"),
        ]))
    }

    fn preflight(registry: &StaticRegistry) -> Preflight<'_, StaticRegistry> {
        Preflight::new(
            registry,
            CommandFilter::new(FilterPolicy::default(), &[]).unwrap(),
            Runner::new(RunOptions::default()),
        )
    }

    #[test]
    fn test_plan_drops_destructive_actions() {
        let registry = registry("/usr/bin/avrdude");
        let plan = preflight(&registry).plan(&request()).unwrap();

        assert_eq!(
            plan.full_command,
            vec![
                "/usr/bin/avrdude",
                "-C/etc/avrdude.conf",
                "-v",
                "-v",
                "-v",
                "-v",
                "-patmega1284p",
                "-cstk500v1",
                "-P/dev/ttyUSB0",
                "-b19200",
                "-Uflash:w:/hw/cestino/avr/bootloaders/optiboot/optiboot_atmega1284p.hex:i",
                "-Ulock:w:0x0F:m",
            ]
        );
        assert_eq!(plan.command, plan.full_command[..10].to_vec());
        assert_eq!(plan.removed.len(), 2);
        assert_eq!(plan.resolution.tool.name, "avrdude");
    }

    #[test]
    fn test_quiet_uses_quiet_params() {
        let registry = registry("/usr/bin/avrdude");
        let plan = preflight(&registry)
            .plan(&request().with_verbose(false))
            .unwrap();
        assert_eq!(&plan.command[2..4], &["-q", "-q"]);
    }

    #[test]
    fn test_layer_sources_in_order() {
        let registry = registry("/usr/bin/avrdude");
        let resolution = preflight(&registry).resolve(&request()).unwrap();
        let names: Vec<&str> = resolution.layers.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["global", "board", "programmer", "tool", "overrides"]);
        assert!(!resolution.layers[4].present);
    }

    #[test]
    fn test_missing_tool_key_is_configuration_problem() {
        let registry = StaticRegistry::new().with_platform(
            Platform::new(PlatformId::new("cestino", "avr"))
                .with_programmer("arduinoasisp", ConfigMap::from([("protocol", "stk500v1")]))
                .with_board("cestino", ConfigMap::from([("build.mcu", "atmega1284p")])),
        );
        let err = preflight(&registry).plan(&request()).unwrap_err();

        assert_eq!(err.stage(), Stage::Resolve);
        assert!(err.is_configuration_problem());
        assert!(err.to_string().contains("bootloader.tool"));
        assert_eq!(
            err.report().history.last().map(|c| c.state),
            Some(PreflightState::Failed)
        );
    }

    #[test]
    fn test_unknown_board() {
        let registry = registry("/usr/bin/avrdude");
        let err = preflight(&registry)
            .plan(&request().with_board("cestino:avr:mega"))
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Selector(SelectorError::UnknownBoard { .. })
        ));
    }

    #[test]
    fn test_without_board_layer_is_absent() {
        let registry = registry("/usr/bin/avrdude");
        let mut prefs = request().preferences;
        prefs.remove("board");
        let request = PreflightRequest::new(prefs).with_override("bootloader.tool", "avrdude");
        let resolution = preflight(&registry).resolve(&request).unwrap();
        assert!(!resolution.layers[1].present);
        assert!(resolution.board.is_none());
    }

    #[test]
    fn test_runtime_paths_without_board() {
        let registry = registry("/usr/bin/avrdude");
        let mut prefs = request().preferences;
        prefs.remove("board");
        let request = PreflightRequest::new(prefs).with_override("bootloader.tool", "avrdude");
        let resolution = preflight(&registry).resolve(&request).unwrap();
        assert_eq!(
            resolution.config.get("runtime.platform.path"),
            Some("/hw/cestino/avr")
        );
        assert_eq!(resolution.config.get("runtime.hardware.path"), Some("/hw/cestino"));
    }

    #[test]
    fn test_override_beats_verbosity_alias() {
        let registry = registry("/usr/bin/avrdude");
        let resolution = preflight(&registry)
            .resolve(&request().with_override("bootloader.verbose", "-q"))
            .unwrap();
        assert_eq!(resolution.config.get("bootloader.verbose"), Some("-q"));
        assert_eq!(resolution.config.get("erase.verbose"), Some("-v"));

        let plan = preflight(&registry)
            .plan(&request().with_override("bootloader.verbose", ""))
            .unwrap();
        assert_eq!(plan.command[2], "-patmega1284p");
    }

    #[test]
    fn test_override_layer_wins() {
        let registry = registry("/usr/bin/avrdude");
        let plan = preflight(&registry)
            .plan(&request().with_override("build.mcu", "atmega644p"))
            .unwrap();
        assert!(plan.command.contains(&"-patmega644p".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_passes_filtered_command_only() {
        let registry = registry("/bin/echo");
        let mut lines = Vec::new();
        let report = preflight(&registry)
            .run(&request(), &mut |stream: Stream, text: &str| {
                lines.push((stream, text.to_string()))
            })
            .unwrap();

        assert_eq!(report.status, PreflightStatus::Succeeded);
        assert_eq!(lines.len(), 1);
        assert!(!lines[0].1.contains("-U"));
        assert!(lines[0].1.ends_with("-b19200"));
        let states: Vec<PreflightState> = report.history.iter().map(|c| c.state).collect();
        assert_eq!(
            states,
            vec![
                PreflightState::Idle,
                PreflightState::ConfigResolved,
                PreflightState::CommandBuilt,
                PreflightState::CommandFiltered,
                PreflightState::Running,
                PreflightState::Succeeded,
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_launch_failure() {
        let registry = registry("/nonexistent/avrdude");
        let mut sink = |_: Stream, _: &str| {};
        let err = preflight(&registry).run(&request(), &mut sink).unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::Launch);
        assert_eq!(err.exit_code(), 40);
        assert!(err.report().execution.is_none());
    }
}
