use anyhow::Result;
use clap::Parser;
use focuslock::{FocusLockConfig, FocusLockOrchestrator};
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "focuslock")]
#[command(about = "Microscope focus lock controller")]
#[command(version)]
#[command(long_about = "Keeps a microscope sample in focus by feeding a quadrant \
photodiode offset back to a z stage. Supports sum searches, lock modes that follow \
filming, optimal-target scans driven by image sharpness and calibration z-scans. \
Runs against a simulated stage, QPD and camera.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "focuslock.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the system")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Dry run mode - initialize but don't start components
    #[arg(long, help = "Perform dry run - initialize components but don't start them")]
    dry_run: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to a file
    #[arg(long, value_name = "PATH", help = "Write logs to this file in addition to stderr")]
    log_file: Option<String>,

    /// Lock mode to select at startup
    #[arg(short, long, value_name = "NAME", help = "Lock mode display name, e.g. \"Always On\"")]
    mode: Option<String>,

    /// Start a film once the feeds are running
    #[arg(long, help = "Start filming immediately")]
    film: bool,

    /// Stop after this many seconds
    #[arg(long, value_name = "SECONDS", help = "Run for a fixed time instead of until Ctrl+C")]
    duration: Option<f64>,

    /// Enable keyboard controls
    #[arg(short, long, help = "Enable keyboard controls (l: lock, up/down: jump, f: film, m: mode, q: quit)")]
    interactive: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle special modes that don't require full initialization
    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    // Keep the guard alive so buffered file logs are flushed on exit
    let log_guard = init_logging(&args)?;

    info!("Starting focus lock v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let mut config = match FocusLockConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };
    if let Some(mode) = &args.mode {
        config.session.initial_mode = mode.clone();
    }

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    let mut orchestrator = FocusLockOrchestrator::new(config).await.map_err(|e| {
        error!("Failed to create orchestrator: {}", e);
        e
    })?;
    orchestrator.set_keyboard_enabled(args.interactive);
    orchestrator.set_film_on_start(args.film);

    orchestrator.initialize().await.map_err(|e| {
        error!("Failed to initialize system: {}", e);
        e
    })?;

    if args.dry_run {
        info!("Dry run mode - components initialized but not started");
        let status = orchestrator.session()?.status().await?;
        orchestrator.shutdown().await?;
        println!("✓ Dry run completed successfully - all components initialized");
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    orchestrator.start().await.map_err(|e| {
        error!("Failed to start system: {}", e);
        e
    })?;

    let duration = args.duration.map(Duration::from_secs_f64);
    let exit_code = orchestrator.run(duration).await.map_err(|e| {
        error!("System error during execution: {}", e);
        e
    })?;

    if let Some(status) = orchestrator.final_status() {
        println!("{}", serde_json::to_string_pretty(status)?);
    }

    info!("Focus lock exited with code: {}", exit_code);
    drop(log_guard);
    std::process::exit(exit_code);
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("focuslock={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    let (file_layer, guard) = match &args.log_file {
        Some(log_file) => {
            let path = Path::new(log_file);
            let directory = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("Log file path '{}' has no file name", log_file))?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(directory, file_name));
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Focus lock configuration file");
    println!("# This is the default configuration with all available options.");
    println!("# Lock parameters can be overridden per section, for example:");
    println!("#");
    println!("# [parameters.locked]");
    println!("# buffer_length = 5");
    println!("# offset_threshold = 20.0  # nm");
    println!("#");
    println!("# [parameters.optimal_mode]");
    println!("# bracket_step = 1000.0  # nm");
    println!("# scan_step = 100.0      # nm");
    println!("# scan_hold = 10         # frames");
    println!();

    let default_config = toml::to_string_pretty(&FocusLockConfig::default())?;
    println!("{}", default_config);
    Ok(())
}
