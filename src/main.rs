//! Aquamon: Main Entry Point
//!
//! Hexagonal architecture: threads feed one application queue, the
//! service owns all pump and alarm state.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  HardwareAdapter   LogEventSink   JsonFileStore  MonotonicClock│
//! │  (Relay+Audio)     (EventSink)    (ConfigPort)   (ClockPort)   │
//! │  Console (stdin)   Supervisor + pollers + watchdog             │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │              AppService (pure logic)                   │    │
//! │  │  PumpEngine · AlarmEngine · Flasher · TimerQueue       │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};

use aquamon::adapters::console::Console;
use aquamon::adapters::hardware::HardwareAdapter;
use aquamon::adapters::log_sink::LogEventSink;
use aquamon::adapters::settings_store::JsonFileStore;
use aquamon::adapters::time::{unix_now, MonotonicClock};
use aquamon::app::commands::AppCommand;
use aquamon::app::ports::{ClockPort, ConfigPort};
use aquamon::app::service::AppService;
use aquamon::config::SystemConfig;
use aquamon::events::{core_queue, CoreMsg, CoreSender};
use aquamon::supervisor::discovery::SystemConnector;
use aquamon::supervisor::Supervisor;
use aquamon::update::bundle::BundleUpdater;
use aquamon::update::fetch::HttpFetcher;
use aquamon::update::{UpdateManager, UpdateStatus};

#[derive(Debug, Parser)]
#[command(name = "aquamon", version, about = "Aquatics sensor and pump coordinator")]
struct Cli {
    /// Settings file.
    #[arg(long, global = true, default_value = "aquamon.json")]
    config: PathBuf,

    /// Default log level (overridden by RUST_LOG).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Run the coordinator (default).
    Run {
        /// Do not read commands from stdin.
        #[arg(long)]
        no_console: bool,
        /// Directory relative alarm cues resolve against.
        #[arg(long)]
        cue_dir: Option<PathBuf>,
    },
    /// Check the manifest for a newer release.
    CheckUpdate,
    /// Download, verify and install a newer release of this program.
    ApplyUpdate {
        /// Re-exec the new program after installing it.
        #[arg(long)]
        restart: bool,
    },
    /// Update a multi-file bundle under an install root.
    ApplyBundle {
        #[arg(long)]
        root: PathBuf,
        /// Manifest key (defaults to the configured artifact key).
        #[arg(long)]
        key: Option<String>,
    },
    /// Load and validate the settings file.
    ValidateConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let store = JsonFileStore::new(&cli.config);
    match cli.command.unwrap_or(CliCommand::Run {
        no_console: false,
        cue_dir: None,
    }) {
        CliCommand::Run {
            no_console,
            cue_dir,
        } => run(&store, no_console, cue_dir),
        CliCommand::CheckUpdate => check_update(&store),
        CliCommand::ApplyUpdate { restart } => apply_update(&store, restart),
        CliCommand::ApplyBundle { root, key } => apply_bundle(&store, root, key),
        CliCommand::ValidateConfig => {
            store
                .load()
                .with_context(|| format!("{} is not a valid config", store.path().display()))?;
            println!("{}: ok", store.path().display());
            Ok(())
        }
    }
}

fn load_config(store: &JsonFileStore) -> SystemConfig {
    match store.load_or_default() {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("Config load failed ({}), using defaults", e);
            SystemConfig::default()
        }
    }
}

// ── Run ───────────────────────────────────────────────────────

fn run(store: &JsonFileStore, no_console: bool, cue_dir: Option<PathBuf>) -> Result<()> {
    info!("╔══════════════════════════════════════╗");
    info!("║  Aquamon v{}                      ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    let config = load_config(store);
    let (queue, rx) = core_queue();
    watch_signals(queue.clone());

    let connector = Arc::new(SystemConnector::new(
        config.link.serial_baud,
        Duration::from_millis(config.link.timeout_ms),
    ));
    let supervisor = Arc::new(Supervisor::new(&config, connector, queue.clone()));
    let stop = Arc::new(AtomicBool::new(false));
    let watchdog = supervisor
        .spawn_watchdog(Arc::clone(&stop))
        .context("spawning watchdog")?;

    if no_console {
        info!("Console disabled");
    } else {
        let console = Console::new(Arc::clone(&supervisor), queue.clone());
        thread::Builder::new()
            .name("console".into())
            .spawn(move || console.run(io::stdin().lock(), io::stdout()))
            .context("spawning console")?;
    }

    if !config.update.manifest_url.is_empty() {
        spawn_update_check(&config, queue.clone());
    }
    drop(queue);

    let mut hw = HardwareAdapter::from_config(&config, cue_dir).context("opening relay lines")?;
    let mut sink = LogEventSink::new();
    let clock = MonotonicClock::new();
    let mut app = AppService::new(config, clock.now_ms());

    info!("System ready. Entering event loop.");
    app.start(&mut hw, &mut sink);
    app.run(&rx, &mut hw, &mut sink, store, &clock);

    stop.store(true, Ordering::Release);
    supervisor.shutdown();
    if watchdog.join().is_err() {
        error!("Watchdog thread panicked");
    }
    hw.all_off();
    info!("Aquamon stopped after {} s", clock.uptime_secs());
    Ok(())
}

/// Turn SIGINT / SIGTERM into a queued shutdown.  Must run before any other
/// thread is spawned so every thread inherits the blocked mask.
#[cfg(unix)]
fn watch_signals(queue: CoreSender) {
    use nix::sys::signal::{SigSet, Signal};

    let mut set = SigSet::empty();
    set.add(Signal::SIGINT);
    set.add(Signal::SIGTERM);
    if let Err(e) = set.thread_block() {
        warn!("Signals: blocking failed ({}), default handling stays", e);
        return;
    }
    let spawned = thread::Builder::new().name("signals".into()).spawn(move || {
        match set.wait() {
            Ok(sig) => info!("Signals: {:?}, shutting down", sig),
            Err(e) => warn!("Signals: wait failed: {}", e),
        }
        queue.send(CoreMsg::Shutdown);
    });
    if let Err(e) = spawned {
        warn!("Signals: watcher thread failed: {}", e);
    }
}

#[cfg(not(unix))]
fn watch_signals(_queue: CoreSender) {}

fn spawn_update_check(config: &SystemConfig, queue: CoreSender) {
    let settings = config.update.clone();
    let spawned = thread::Builder::new().name("update-check".into()).spawn(move || {
        let fetcher = match HttpFetcher::new(Duration::from_secs(settings.fetch_timeout_secs)) {
            Ok(f) => f,
            Err(e) => {
                warn!("Update: {}", e);
                return;
            }
        };
        let manager = UpdateManager::new(
            fetcher,
            settings.manifest_url,
            settings.artifact_key,
            env!("CARGO_PKG_VERSION"),
            PathBuf::new(),
        );
        match manager.check() {
            Ok(UpdateStatus::Available(r)) => {
                info!("Update: {} available, run `aquamon apply-update`", r.latest_version);
            }
            Ok(UpdateStatus::UpToDate { .. }) => {}
            Err(e) => {
                warn!("Update: check failed: {}", e);
                return;
            }
        }
        queue.send(CoreMsg::Command(AppCommand::RecordUpdateCheck(unix_now())));
    });
    if let Err(e) = spawned {
        warn!("Update: check thread failed: {}", e);
    }
}

// ── Update subcommands ────────────────────────────────────────

fn manager(config: &SystemConfig) -> Result<UpdateManager<HttpFetcher>> {
    let settings = &config.update;
    if settings.manifest_url.is_empty() {
        bail!("no update.manifest_url configured");
    }
    let live = match &settings.live_path {
        Some(p) => p.clone(),
        None => std::env::current_exe().context("locating the running executable")?,
    };
    Ok(UpdateManager::new(
        HttpFetcher::new(Duration::from_secs(settings.fetch_timeout_secs))?,
        settings.manifest_url.clone(),
        settings.artifact_key.clone(),
        env!("CARGO_PKG_VERSION"),
        live,
    ))
}

fn record_check(store: &JsonFileStore, mut config: SystemConfig) {
    config.update.last_check_unix = Some(unix_now());
    if let Err(e) = store.save(&config) {
        warn!("Update: could not record check time: {}", e);
    }
}

fn check_update(store: &JsonFileStore) -> Result<()> {
    let config = load_config(store);
    let status = manager(&config)?.check()?;
    match &status {
        UpdateStatus::UpToDate { latest } => println!("up to date (latest {latest})"),
        UpdateStatus::Available(r) => println!("update available: {}", r.latest_version),
    }
    record_check(store, config);
    Ok(())
}

fn apply_update(store: &JsonFileStore, restart: bool) -> Result<()> {
    let config = load_config(store);
    let manager = manager(&config)?;
    let release = match manager.check()? {
        UpdateStatus::UpToDate { latest } => {
            println!("up to date (latest {latest})");
            record_check(store, config);
            return Ok(());
        }
        UpdateStatus::Available(release) => release,
    };
    manager.apply(&release)?;
    record_check(store, config);
    println!("installed {} at {}", release.latest_version, manager.live_path().display());
    if restart {
        return Err(manager.restart().into());
    }
    Ok(())
}

fn apply_bundle(store: &JsonFileStore, root: PathBuf, key: Option<String>) -> Result<()> {
    let config = load_config(store);
    let key = key.unwrap_or_else(|| config.update.artifact_key.clone());
    let fetcher = HttpFetcher::new(Duration::from_secs(config.update.fetch_timeout_secs))?;
    let bundle = BundleUpdater::new(root, fetcher);
    match bundle.check(&config.update.manifest_url, &key)? {
        UpdateStatus::UpToDate { latest } => {
            bundle.record_check(unix_now())?;
            println!("bundle up to date (latest {latest})");
        }
        UpdateStatus::Available(release) => {
            bundle.apply(&release, unix_now())?;
            println!("bundle updated to {}", release.latest_version);
        }
    }
    Ok(())
}
