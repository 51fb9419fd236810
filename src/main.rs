//! Burn preflight CLI
//!
//! Entry point for the `burn-preflight` command-line tool.

use std::path::PathBuf;
use std::process;

use burn_preflight::environment::{Environment, EnvironmentError};
use burn_preflight::preflight::{ExitCode, Preflight, PreflightError, PreflightRequest};
use burn_preflight::settings::{EffectiveSettings, SettingsError};
use burn_preflight::signal::SignalHandler;
use burn_preflight::HardwareRegistry;
use clap::{Parser, Subcommand};
use preflight_command::{render_command, FilterError};
use preflight_config::{ConfigMap, MissingConfigKey};
use preflight_runner::{CancelToken, Stream};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "burn-preflight")]
#[command(about = "Read and verify a bootloader burn target without writing to it", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (default: ~/.config/burn-preflight/config.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Arduino preferences.txt holding the active board and programmer
    #[arg(long, global = true)]
    preferences: Option<PathBuf>,

    /// Hardware folder to scan (repeatable; replaces the configured list)
    #[arg(long, global = true)]
    hardware: Vec<PathBuf>,

    /// Board as package:architecture:board
    #[arg(long, global = true)]
    board: Option<String>,

    /// Programmer selector, bare or package:name
    #[arg(long, global = true)]
    programmer: Option<String>,

    /// Override a configuration key after all other layers (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_assignment, global = true)]
    set: Vec<(String, String)>,

    /// Use the quiet programmer arguments
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Log filter, e.g. `debug` or `burn_preflight=trace` (default: RUST_LOG, then warn)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the device check
    Run,

    /// Show the full and the safe command without running anything
    Explain,

    /// Print the resolved configuration
    Config {
        /// Print only this key
        #[arg(long)]
        key: Option<String>,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    #[error("invalid filter settings: {0}")]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Preflight(#[from] PreflightError),

    #[error(transparent)]
    MissingKey(#[from] MissingConfigKey),

    #[error("failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error("failed to serialize output: {0}")]
    Output(#[from] serde_json::Error),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            CliError::Settings(_) | CliError::Signal(_) | CliError::Output(_) => {
                ExitCode::Usage.code()
            }
            CliError::Environment(_) | CliError::Filter(_) | CliError::MissingKey(_) => {
                ExitCode::Configuration.code()
            }
            CliError::Preflight(e) => e.exit_code(),
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    let code = match execute(&cli) {
        Ok(()) => ExitCode::Success.code(),
        Err(e) => {
            report_error(&cli, &e);
            e.exit_code()
        }
    };
    process::exit(code);
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

fn settings_overrides(cli: &Cli) -> Option<serde_json::Value> {
    let mut overrides = serde_json::Map::new();
    if let Some(path) = &cli.preferences {
        overrides.insert("preferences".into(), path.to_string_lossy().into_owned().into());
    }
    if !cli.hardware.is_empty() {
        let roots = cli
            .hardware
            .iter()
            .map(|p| serde_json::Value::from(p.to_string_lossy().into_owned()))
            .collect();
        overrides.insert("hardware".into(), serde_json::Value::Array(roots));
    }
    if cli.quiet {
        overrides.insert("verbose".into(), false.into());
    }
    (!overrides.is_empty()).then_some(serde_json::Value::Object(overrides))
}

fn execute(cli: &Cli) -> Result<(), CliError> {
    let effective = EffectiveSettings::load(cli.config.as_deref(), settings_overrides(cli))?;
    let settings = &effective.settings;
    let environment = Environment::load(settings)?;

    let cancel = CancelToken::new();
    let preflight = Preflight::from_settings(&environment.registry, settings, cancel.clone())?;

    let mut request = PreflightRequest::new(environment.preferences.clone())
        .with_verbose(settings.verbose);
    request.board = cli.board.clone();
    request.programmer = cli.programmer.clone();
    request.overrides = cli.set.iter().cloned().collect::<ConfigMap>();

    match &cli.command {
        Commands::Run => {
            SignalHandler::new(cancel).install()?;
            run_check(cli, &preflight, &request)
        }
        Commands::Explain => run_explain(cli, &preflight, &request),
        Commands::Config { key } => run_config(cli, &preflight, &request, key.as_deref()),
    }
}

fn run_check(
    cli: &Cli,
    preflight: &Preflight<'_, HardwareRegistry>,
    request: &PreflightRequest,
) -> Result<(), CliError> {
    let json = cli.json;
    let mut print_line = |stream: Stream, text: &str| {
        // JSON mode keeps stdout for the report.
        if json || stream == Stream::Stderr {
            eprintln!("{}", text);
        } else {
            println!("{}", text);
        }
    };

    let report = preflight.run(request, &mut print_line)?;
    if cli.json {
        println!("{}", report.to_json()?);
    } else {
        let duration = report
            .execution
            .as_ref()
            .map(|r| r.duration.as_millis())
            .unwrap_or_default();
        println!("Device check passed ({} ms)", duration);
        println!("  Ran:     {}", render_command(&report.command));
        println!("  Skipped: {}", render_command(&report.removed));
    }
    Ok(())
}

fn run_explain(
    cli: &Cli,
    preflight: &Preflight<'_, HardwareRegistry>,
    request: &PreflightRequest,
) -> Result<(), CliError> {
    let plan = preflight.plan(request)?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    let resolution = &plan.resolution;
    println!("Platform:   {}", resolution.platform);
    if let Some(board) = &resolution.board {
        println!("Board:      {}", board);
    }
    println!(
        "Programmer: {} (from {})",
        resolution.programmer.selector, resolution.programmer.platform
    );
    println!(
        "Tool:       {} (from {})",
        resolution.tool.selector, resolution.tool.platform
    );
    println!();
    println!("Layers:");
    for layer in &resolution.layers {
        if layer.present {
            println!(
                "  {:<10} {} keys, {} overridden",
                layer.name, layer.keys, layer.overridden
            );
        } else {
            println!("  {:<10} absent", layer.name);
        }
    }
    println!();
    println!("Pattern:      {}", plan.pattern);
    println!("Full command: {}", render_command(&plan.full_command));
    println!("Safe command: {}", render_command(&plan.command));
    println!("Removed:      {}", render_command(&plan.removed));
    Ok(())
}

fn run_config(
    cli: &Cli,
    preflight: &Preflight<'_, HardwareRegistry>,
    request: &PreflightRequest,
    key: Option<&str>,
) -> Result<(), CliError> {
    let resolution = preflight.resolve(request)?;
    let config = &resolution.config;

    match key {
        Some(key) => {
            let value = config.get_required(key)?;
            if cli.json {
                println!("{}", serde_json::to_string(value)?);
            } else {
                println!("{}", value);
            }
        }
        None if cli.json => println!("{}", serde_json::to_string_pretty(config)?),
        None => {
            for (key, value) in config.iter() {
                println!("{}={}", key, value);
            }
        }
    }
    Ok(())
}

fn report_error(cli: &Cli, err: &CliError) {
    if let CliError::Preflight(e) = err {
        if cli.json {
            match e.report().to_json() {
                Ok(json) => println!("{}", json),
                Err(ser) => eprintln!("failed to serialize report: {}", ser),
            }
        }
        if let Some(execution) = &e.report().execution {
            if let Some(code) = execution.exit_code {
                eprintln!("programmer exited with status {}", code);
            }
        }
    }
    eprintln!("error: {}", err);
}
