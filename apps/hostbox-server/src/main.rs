use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hostkit::{
    ConfigSource, FactoryRegistry, HostSettings, ResolutionPolicy, RunOptions, ShutdownOptions,
};
use hostkit_bootstrap::{AppConfig, CliArgs};
use mimalloc::MiMalloc;

use std::path::{Path, PathBuf};

mod registered_components;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// HostBox Server - isolated component host
#[derive(Parser)]
#[command(name = "hostbox-server")]
#[command(about = "HostBox Server - loads components into isolated boundaries and runs them")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Component entry module; repeat or separate with ';' (replaces configured components)
    #[arg(short, long = "path")]
    paths: Vec<String>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and run the configured components
    Run,
    /// Validate configuration and component paths, then exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        paths: cli.paths.clone(),
        print_config: cli.print_config,
        verbose: cli.verbose,
    };

    // Layered config:
    // 1) defaults -> 2) YAML (if provided) -> 3) env (HOSTBOX__*) -> 4) CLI overrides
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    let logging_config = config.logging.clone().unwrap_or_default();
    hostkit_bootstrap::logging::init_logging_unified(
        &logging_config,
        Path::new(&config.server.home_dir),
    );

    tracing::info!(home_dir = %config.server.home_dir, "HostBox Server starting");

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    let base = std::env::current_dir().context("Failed to determine working directory")?;
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_server(config, &base).await,
        Commands::Check => check_config(config, &base),
    }
}

async fn run_server(config: AppConfig, base: &Path) -> Result<()> {
    let settings = host_settings(&config, base);
    let factories = FactoryRegistry::discover()?;

    tracing::info!(
        components = settings.components.len(),
        factories = factories.len(),
        policy = %settings.policy.default_behavior(),
        "Starting component host"
    );

    hostkit::run(RunOptions {
        settings,
        config: ConfigSource::new(config.component_config_tree()),
        factories,
        shutdown: ShutdownOptions::Signals,
    })
    .await
}

fn check_config(config: AppConfig, base: &Path) -> Result<()> {
    tracing::info!("Checking configuration…");

    let settings = host_settings(&config, base);
    let factories = FactoryRegistry::discover()?;

    let missing: Vec<String> = settings
        .components
        .iter()
        .filter(|p| !p.is_file())
        .map(|p| p.display().to_string())
        .collect();
    if !missing.is_empty() {
        anyhow::bail!("component entry modules not found: {}", missing.join(", "));
    }

    println!("Configuration is valid");
    println!(
        "Factories: {}",
        factories.ids().collect::<Vec<_>>().join(", ")
    );
    println!("{}", config.to_yaml()?);
    Ok(())
}

/// Translate the loaded configuration into host settings. Relative component and
/// probing paths resolve against `base`; the shared store path is kept as written
/// because it is resolved per component.
fn host_settings(config: &AppConfig, base: &Path) -> HostSettings {
    let shared = &config.shared_libraries;
    let absolutize = |raw: &String| {
        let p = Path::new(raw);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            base.join(p)
        }
    };

    HostSettings {
        components: config.component_paths(base),
        shared_library_path: shared.path.as_ref().map(PathBuf::from),
        probing_paths: shared.probing_paths.iter().map(absolutize).collect(),
        resource_probing_paths: shared.resource_probing_paths.iter().map(absolutize).collect(),
        policy: ResolutionPolicy::from_config(&shared.default_behavior, &shared.overrides),
        async_start: config.server.async_start,
        stopping_timeout: config.server.stopping_timeout,
    }
}
