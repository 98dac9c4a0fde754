use anyhow::Context;
use care_signal::config::Config;
use care_signal::error::ConfigError;
use care_signal::events::{RawEvent, TenantId};
use care_signal::orchestrator::{DispatchOutcome, Scheduler, StaticTenantRegistry};
use care_signal::store::{CareStore, MemoryStore};
use care_signal::CareSignalService;
use clap::Parser;
use log::{error, info, warn};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How often the daemon logs its own health
const MONITOR_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Capacity of the run signal queue shared by the ticker and backlog watcher
const SIGNAL_QUEUE_CAPACITY: usize = 256;

/// Command-line arguments for the care signal pipeline
#[derive(Parser)]
#[command(
    name = "care-signal",
    about = "Care signal pipeline - turns care events into ranked, explainable issues",
    long_about = "Runs the care signal intelligence pipeline: aggregates vitals, task and staffing \
                  events, maintains rolling baselines, detects anomalies, scores risk and ranks \
                  issues for supervisor review, on a schedule and when backlog builds up."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    /// JSON-lines file of raw events to ingest at startup
    #[arg(short, long, value_name = "FILE")]
    replay: Option<PathBuf>,

    /// Run every known tenant once, print the run reports and exit
    #[arg(long)]
    once: bool,
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// # Returns
    ///
    /// `Ok(())` if all arguments are valid, `Err(String)` with error message otherwise
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            // Missing config files fall back to defaults in load_config
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }

                if let Some(extension) = config_path.extension() {
                    if extension != "toml" {
                        warn!(
                            "Configuration file does not have .toml extension: {}",
                            config_path.display()
                        );
                    }
                }
            }
        }

        if let Some(ref replay_path) = self.replay {
            if !replay_path.is_file() {
                return Err(format!(
                    "Replay file does not exist or is not a file: {}",
                    replay_path.display()
                ));
            }
        }

        Ok(())
    }

    /// Convert config path to string safely, handling non-UTF-8 paths
    ///
    /// # Returns
    ///
    /// `Ok(Some(path_str))` if config is provided and valid UTF-8,
    /// `Ok(None)` if no config provided,
    /// `Err(String)` if config path contains invalid UTF-8
    fn config_path_str(&self) -> Result<Option<&str>, String> {
        match &self.config {
            Some(path) => match path.to_str() {
                Some(path_str) => Ok(Some(path_str)),
                None => Err(format!(
                    "Configuration file path contains invalid UTF-8 characters: {}",
                    path.display()
                )),
            },
            None => Ok(None),
        }
    }
}

/// Load configuration from file or use defaults
///
/// A missing or invalid file is reported and replaced by the defaults.
fn load_config(config_path: Option<&str>) -> Config {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            match Config::from_file(Path::new(path)) {
                Ok(config) => config,
                Err(ConfigError::ReadError(_)) => {
                    warn!(
                        "Configuration file '{}' not found or unreadable, using defaults",
                        path
                    );
                    Config::default()
                }
                Err(e) => {
                    error!("Configuration error in '{}': {}", path, e);
                    warn!("Using default configuration due to invalid config file");
                    Config::default()
                }
            }
        }
        None => {
            info!("Using default configuration");
            Config::default()
        }
    }
}

/// Parse a JSON-lines file of raw events
///
/// Blank lines and lines starting with `#` are ignored. Lines that do not parse
/// are logged and skipped; the returned count says how many.
fn read_replay(path: &Path) -> anyhow::Result<(Vec<RawEvent>, usize)> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read replay file {}", path.display()))?;

    let mut events = Vec::new();
    let mut unparsable = 0;
    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match serde_json::from_str::<RawEvent>(line) {
            Ok(event) => events.push(event),
            Err(e) => {
                warn!("Skipping replay line {}: {}", index + 1, e);
                unparsable += 1;
            }
        }
    }
    Ok((events, unparsable))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    info!("Starting care signal pipeline");

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    let config_path = match cli.config_path_str() {
        Ok(path) => path,
        Err(e) => {
            error!("Invalid configuration path: {}", e);
            std::process::exit(1);
        }
    };
    let config = load_config(config_path);

    let store: Arc<dyn CareStore> = Arc::new(MemoryStore::new());
    let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_QUEUE_CAPACITY);
    let service = CareSignalService::new(&config, Arc::clone(&store), signal_tx.clone());

    let mut tenants: BTreeSet<TenantId> = config.tenants.active.iter().cloned().collect();
    if let Some(ref path) = cli.replay {
        let (events, unparsable) = read_replay(path)?;
        let summary = service.ingest_batch(events);
        info!(
            "Replayed {}: {} created, {} duplicates, {} rejected, {} unparsable",
            path.display(),
            summary.created,
            summary.skipped,
            summary.rejected,
            unparsable
        );
        tenants.extend(summary.tenants);
    }

    if cli.once {
        for tenant_id in &tenants {
            match service.trigger_now(tenant_id).await {
                DispatchOutcome::Finished(report) | DispatchOutcome::TimedOut(report) => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                DispatchOutcome::Skipped => warn!("Tenant {} was already running", tenant_id),
                DispatchOutcome::Aborted(reason) => {
                    error!("Run for tenant {} aborted: {}", tenant_id, reason)
                }
            }
        }
        service.monitor().log_summary();
        return Ok(());
    }

    if tenants.is_empty() {
        warn!("No active tenants configured; only backlog triggers will start runs");
    }

    let dispatcher_task = tokio::spawn(service.dispatcher().serve(signal_rx));
    let registry = Arc::new(StaticTenantRegistry::new(tenants.into_iter().collect()));
    let scheduler_task = Scheduler::new(
        registry,
        signal_tx.clone(),
        Duration::from_secs(config.scheduler.interval_seconds),
    )
    .spawn();

    let monitor = service.monitor();
    let monitor_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(MONITOR_LOG_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            monitor.log_summary();
        }
    });

    // Set up signal handling for graceful shutdown (SIGINT)
    let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel::<()>();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), shutting down gracefully...");
        if let Err(e) = shutdown_tx.send(()) {
            error!("Failed to send shutdown signal: {}", e);
        }
    })
    .context("Error setting SIGINT handler for graceful shutdown")?;

    info!("Care signal pipeline is running. Press Ctrl+C to stop.");
    shutdown_rx.recv().await;

    scheduler_task.abort();
    monitor_task.abort();
    service.monitor().log_summary();

    // Closing every sender lets the dispatcher drain and stop
    drop(signal_tx);
    drop(service);
    let drain = Duration::from_secs(config.scheduler.max_run_seconds);
    if tokio::time::timeout(drain, dispatcher_task).await.is_err() {
        warn!("Dispatcher did not stop within {:?}", drain);
    }

    info!("Care signal pipeline shutdown complete");
    Ok(())
}
