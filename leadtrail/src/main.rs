//! leadtrail - website visitor tracker
//!
//! This tool provides commands for:
//! - Showing agent settings and file locations
//! - Validating a tracker boot configuration or fetching one from the API
//! - Inspecting the visitor identity stored for an origin
//! - Replaying a recorded session script through the capture engine
//!
//! Uses XDG Base Directory specification for file locations:
//! - Config: $XDG_CONFIG_HOME/leadtrail/config.toml (~/.config/leadtrail/config.toml)
//! - Identity: $XDG_DATA_HOME/leadtrail/identity/ (~/.local/share/leadtrail/identity/)
//! - Logs: $XDG_STATE_HOME/leadtrail/ (~/.local/state/leadtrail/)

mod replay;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use leadtrail_core::clock::{Clock, ManualClock, SystemClock};
use leadtrail_core::collector::{ApiClient, Deliver, MemoryTransport, QueueStats, TieredTransport};
use leadtrail_core::identity::{self, FileStorage, IdentityStore, MemoryStorage, Storage};
use leadtrail_core::{Config, Engine, EngineDeps, PageEnvironment, TrackerConfig};

#[derive(Parser)]
#[command(name = "leadtrail")]
#[command(about = "Capture website form activity and deliver it to a collection endpoint")]
#[command(version)]
struct Args {
    /// Write logs to the state directory
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show agent settings and file locations
    Status,

    /// Inspect tracker boot configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show the visitor identity stored for an origin
    Identity {
        /// Site origin the identity belongs to
        #[arg(long, default_value = "https://localhost")]
        origin: String,

        /// Forget the stored visitor id
        #[arg(long)]
        reset: bool,
    },

    /// Replay a recorded session script through the engine
    Replay {
        /// Newline-delimited JSON script
        script: PathBuf,

        /// Tracker boot configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Page location the session starts on
        #[arg(long, default_value = "https://localhost/")]
        url: String,

        /// Page title
        #[arg(long, default_value = "")]
        title: String,

        /// Print batches instead of sending them
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate a boot configuration file and print it with defaults applied
    Check {
        path: PathBuf,
    },

    /// Fetch the boot configuration for an API key
    Fetch {
        #[arg(long)]
        api_key: String,

        #[arg(long, default_value = "http://localhost:5000")]
        api_url: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let settings = Config::load().context("failed to load configuration")?;

    // Held for the whole run so buffered log lines are written on exit
    let _log_guard = if args.verbose {
        Some(leadtrail_core::logging::init(&settings.logging).context("failed to initialize logging")?)
    } else {
        None
    };

    match args.command {
        Command::Status => cmd_status(&settings),
        Command::Config { action } => match action {
            ConfigAction::Check { path } => cmd_config_check(&path),
            ConfigAction::Fetch { api_key, api_url } => {
                cmd_config_fetch(&settings, &api_key, &api_url)
            }
        },
        Command::Identity { origin, reset } => cmd_identity(&settings, &origin, reset),
        Command::Replay {
            script,
            config,
            url,
            title,
            dry_run,
        } => cmd_replay(&settings, &script, &config, &url, &title, dry_run),
    }
}

fn cmd_status(settings: &Config) -> Result<()> {
    println!("leadtrail {}", env!("CARGO_PKG_VERSION"));
    println!("==================");
    println!();

    let config_path = Config::config_path();
    println!(
        "Config file:     {}{}",
        config_path.display(),
        if config_path.exists() { "" } else { " (not found, using defaults)" }
    );
    println!("Data dir:        {}", Config::data_dir().display());
    println!("Identity dir:    {}", settings.identity_dir().display());
    println!("State dir:       {}", Config::state_dir().display());
    println!("Log file:        {}", leadtrail_core::logging::log_file_path().display());
    println!();

    let effective = toml::to_string(settings).context("failed to render settings")?;
    println!("Effective settings:");
    println!();
    for line in effective.lines() {
        println!("  {}", line);
    }

    Ok(())
}

fn cmd_config_check(path: &Path) -> Result<()> {
    let config = TrackerConfig::load(path)
        .with_context(|| format!("invalid tracker configuration in {}", path.display()))?;

    println!("{}", serde_json::to_string_pretty(&config)?);
    eprintln!("Configuration OK: {}", path.display());
    Ok(())
}

fn cmd_config_fetch(settings: &Config, api_key: &str, api_url: &str) -> Result<()> {
    let client = ApiClient::new(api_url, &settings.transport).context("failed to create API client")?;
    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;

    let config = runtime
        .block_on(client.fetch_config(api_key))
        .with_context(|| format!("failed to fetch configuration from {}", client.config_url(api_key)))?;

    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_identity(settings: &Config, origin: &str, reset: bool) -> Result<()> {
    let mut storage = FileStorage::for_origin(&settings.identity_dir(), origin);
    let path = storage.path().to_path_buf();

    if reset {
        storage
            .remove(identity::VISITOR_KEY)
            .context("failed to reset visitor id")?;
        println!("Visitor id cleared for {}", origin);
        return Ok(());
    }

    let mut store = IdentityStore::new(
        Box::new(storage),
        Box::new(MemoryStorage::new()),
        Arc::new(SystemClock),
    );

    println!("Origin:      {}", origin);
    println!("Visitor ID:  {}", store.visitor_id());
    println!("Stored in:   {}", path.display());
    Ok(())
}

fn cmd_replay(
    settings: &Config,
    script_path: &Path,
    config_path: &Path,
    url: &str,
    title: &str,
    dry_run: bool,
) -> Result<()> {
    let config = TrackerConfig::load(config_path)
        .with_context(|| format!("invalid tracker configuration in {}", config_path.display()))?;
    let content = std::fs::read_to_string(script_path)
        .with_context(|| format!("failed to read {}", script_path.display()))?;
    let steps = replay::parse_script(&content)
        .with_context(|| format!("invalid replay script {}", script_path.display()))?;

    let clock = ManualClock::new(Utc::now());
    let clock_dyn: Arc<dyn Clock> = Arc::new(clock.clone());
    let origin = identity::origin_of(url);
    let identity = IdentityStore::new(
        Box::new(FileStorage::for_origin(&settings.identity_dir(), &origin)),
        Box::new(MemoryStorage::new()),
        clock_dyn.clone(),
    );
    let environment = PageEnvironment {
        url: url.to_string(),
        title: title.to_string(),
        ..PageEnvironment::default()
    };

    if dry_run {
        let transport = MemoryTransport::new();
        let stats = drive(
            config,
            engine_deps(clock_dyn, identity, Box::new(transport.clone()), environment),
            &clock,
            steps,
        )?;

        for batch in transport.batches() {
            let body = batch.to_body().context("failed to encode batch")?;
            println!("{}", String::from_utf8_lossy(&body));
        }
        print_summary(&stats, true);
        return Ok(());
    }

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    let client = ApiClient::new(config.base_url(), &settings.transport)
        .context("failed to create API client")?;
    let (transport, worker) = TieredTransport::http(client, &settings.transport, runtime.handle());

    let stats = drive(
        config,
        engine_deps(clock_dyn, identity, Box::new(transport), environment),
        &clock,
        steps,
    )?;

    // The engine (and with it the only beacon sender) is gone; wait for the worker
    let delivered = runtime.block_on(worker.drain());
    tracing::info!(delivered, "Beacon worker drained");

    print_summary(&stats, false);
    Ok(())
}

fn engine_deps(
    clock: Arc<dyn Clock>,
    identity: IdentityStore,
    transport: Box<dyn Deliver>,
    environment: PageEnvironment,
) -> EngineDeps {
    EngineDeps {
        clock,
        identity,
        transport,
        environment,
    }
}

/// Run the script against a fresh engine and shut it down
fn drive(
    config: TrackerConfig,
    deps: EngineDeps,
    clock: &ManualClock,
    steps: Vec<replay::Step>,
) -> Result<QueueStats> {
    let mut engine = Engine::new(config, deps).context("failed to create engine")?;
    let summary = replay::run(&mut engine, clock, steps)?;
    let stats = engine.shutdown();

    eprintln!(
        "Replayed {} steps over {} ms ({} timer firings)",
        summary.steps, summary.elapsed_ms, summary.ticks
    );
    Ok(stats)
}

fn print_summary(stats: &QueueStats, dry_run: bool) {
    eprintln!(
        "Batches: {}  Events: {}  Beacon: {}  Fetch: {}  Failed: {}{}",
        stats.batches_flushed,
        stats.events_flushed,
        stats.beacon_deliveries,
        stats.fetch_deliveries,
        stats.failed_deliveries,
        if dry_run { "  (dry run)" } else { "" }
    );
}
