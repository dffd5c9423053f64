//! Sensorflow CLI
//!
//! Runs experiment descriptors against generated sensor sources.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sensorflow::{
    builtin_sources, EngineConfig, EventClock, ExperimentDescriptor, ExperimentSession,
    SensorHub, VERSION,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sensorflow")]
#[command(version = VERSION)]
#[command(about = "Sensor acquisition and analysis dataflow engine", long_about = None)]
struct Cli {
    /// Engine configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an experiment against the built-in generated sources
    Run {
        /// Experiment descriptor (JSON)
        experiment: PathBuf,

        /// Stop after this many seconds (runs until Ctrl+C if omitted)
        #[arg(long, short)]
        duration: Option<f64>,

        /// Write the final session statistics to this file
        #[arg(long)]
        stats_out: Option<PathBuf>,
    },

    /// Check that an experiment descriptor can be loaded
    Validate {
        /// Experiment descriptor (JSON)
        experiment: PathBuf,
    },

    /// Show configuration
    Config,

    /// List the built-in sources
    Sources,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sensorflow=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            experiment,
            duration,
            stats_out,
        } => cmd_run(
            &experiment,
            duration,
            stats_out.as_deref(),
            cli.config.as_deref(),
        ),
        Commands::Validate { experiment } => cmd_validate(&experiment, cli.config.as_deref()),
        Commands::Config => cmd_config(cli.config.as_deref()),
        Commands::Sources => {
            cmd_sources();
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load_from(path)
            .with_context(|| format!("Could not load config {}", path.display())),
        None => EngineConfig::load().context("Could not load config"),
    }
}

fn load_experiment(path: &Path) -> Result<ExperimentDescriptor> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Could not read {}", path.display()))?;
    ExperimentDescriptor::from_json(&json)
        .with_context(|| format!("Invalid experiment descriptor {}", path.display()))
}

fn builtin_hub() -> Result<SensorHub> {
    let clock = EventClock::new();
    let mut hub = SensorHub::new(clock);
    for source in builtin_sources(clock) {
        hub.register(Box::new(source))?;
    }
    Ok(hub)
}

fn cmd_run(
    experiment_path: &Path,
    duration: Option<f64>,
    stats_out: Option<&Path>,
    config_path: Option<&Path>,
) -> Result<()> {
    println!("Sensorflow v{VERSION}");
    println!();

    if let Some(secs) = duration {
        anyhow::ensure!(
            secs.is_finite() && secs >= 0.0,
            "--duration must be a non-negative number of seconds"
        );
    }

    let config = load_config(config_path)?;
    let experiment = load_experiment(experiment_path)?;
    let mut session = ExperimentSession::new(&experiment, builtin_hub()?, config)
        .context("Could not set up experiment")?;

    println!("Experiment: {}", session.title());
    println!("  Session ID: {}", session.id());
    println!("  Buffers: {}", experiment.buffers.len());
    println!("  Inputs: {}", experiment.inputs.len());
    println!("  Analysis modules: {}", experiment.analysis.modules.len());
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    session.start().context("Could not start experiment")?;
    let started = Instant::now();
    let limit = duration.map(Duration::from_secs_f64);
    let mut last_report = Instant::now();

    while running.load(Ordering::SeqCst) {
        if limit.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }
        thread::sleep(Duration::from_millis(100));

        if last_report.elapsed() >= Duration::from_secs(1) {
            let stats = session.stats().stats();
            println!(
                "[{:>6.1}s] samples: {} | values written: {} | iterations: {}",
                started.elapsed().as_secs_f64(),
                stats.received,
                stats.values_written,
                stats.analysis_iterations
            );
            last_report = Instant::now();
        }
    }

    session.stop();
    println!();
    println!("Buffers:");
    for buffer in session.buffers().iter() {
        let last = buffer
            .last()
            .map_or_else(|| "-".to_string(), |v| format!("{v:.6}"));
        println!("  {:<20} {:>10} values  last = {}", buffer.name(), buffer.len(), last);
    }
    println!();
    println!("{}", session.stats().summary());

    if let Some(path) = stats_out {
        session
            .stats()
            .save(path)
            .with_context(|| format!("Could not write {}", path.display()))?;
        println!("Statistics written to {}", path.display());
    }
    Ok(())
}

fn cmd_validate(experiment_path: &Path, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let experiment = load_experiment(experiment_path)?;
    let session = ExperimentSession::new(&experiment, builtin_hub()?, config)
        .context("Experiment is invalid")?;

    println!("Experiment '{}' is valid.", session.title());
    println!("  Buffers: {}", experiment.buffers.len());
    println!("  Inputs: {}", experiment.inputs.len());
    println!("  Analysis modules: {}", experiment.analysis.modules.len());
    Ok(())
}

fn cmd_config(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;

    println!("Configuration");
    println!("=============");
    println!();
    println!(
        "Config file: {}",
        config_path.map_or_else(EngineConfig::config_path, Path::to_path_buf).display()
    );
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_sources() {
    let hub = match builtin_hub() {
        Ok(hub) => hub,
        Err(e) => {
            eprintln!("Error: {e}");
            return;
        }
    };
    let mut ids: Vec<&str> = hub.source_ids().collect();
    ids.sort_unstable();

    println!("Built-in sources:");
    for id in ids {
        println!("  {id}");
    }
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")
}
