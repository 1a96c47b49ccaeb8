//! ---
//! r8s_section: "01-core-functionality"
//! r8s_subsection: "binary"
//! r8s_type: "source"
//! r8s_scope: "code"
//! r8s_description: "Binary entrypoint for the R8 Speeder daemon."
//! r8s_version: "v0.1.0"
//! r8s_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use r8_speeder_common::config::{LoadedConfig, NotificationConfig, SpeederConfig};
use r8_speeder_common::logging::init_tracing;
use r8_speeder_core::{spawn_reaper, LogSink, NotificationSink, SpeedTracker, WebhookSink};
use r8_speeder_sim::{spawn_feed, ReplayFeed};
use tokio::runtime::Handle;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

const DEFAULT_CONFIG_PATH: &str = "configs/speeder.toml";

#[derive(Debug, Parser)]
#[command(
    author,
    version = concat!("R8 Speeder ", env!("CARGO_PKG_VERSION")),
    about = "Player train speed monitor for Run8",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Replay a JSON or CSV scenario as the telemetry feed")]
    scenario: Option<PathBuf>,

    #[arg(long, value_name = "FACTOR", help = "Override the scenario replay speedup")]
    speedup: Option<f64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the speed monitor")]
    Run,
    #[command(about = "Print the effective configuration as TOML")]
    PrintConfig,
    #[command(about = "Replay a scenario at full speed and report what it produced")]
    CheckScenario {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from(DEFAULT_CONFIG_PATH));

    let LoadedConfig {
        mut config,
        source,
        warnings,
    } = SpeederConfig::load_with_source(&candidates);
    if let Some(scenario) = cli.scenario {
        config.feed.scenario = Some(scenario);
    }
    if let Some(speedup) = cli.speedup.filter(|s| s.is_finite() && *s > 0.0) {
        config.feed.replay_speedup = speedup;
    }

    init_tracing("r8-speederd", &config.logging)?;
    match &source {
        Some(path) => info!(path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found; using defaults"),
    }
    for warning in &warnings {
        warn!(%warning, "configuration entry ignored");
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config).await?,
        Commands::PrintConfig => println!("{}", config.to_toml()?),
        Commands::CheckScenario { path } => check_scenario(&config, &path).await?,
    }

    Ok(())
}

fn build_sink(config: &NotificationConfig) -> Result<Arc<dyn NotificationSink>> {
    if config.enabled && config.has_webhooks() {
        let sink = WebhookSink::new(config).context("failed to build webhook client")?;
        info!(
            status = config.status_webhook.is_some(),
            alert = config.alert_webhook.is_some(),
            "webhook notifications enabled"
        );
        Ok(Arc::new(sink))
    } else {
        if config.enabled {
            warn!("notifications enabled but no webhooks configured; logging only");
        }
        Ok(Arc::new(LogSink))
    }
}

async fn run_daemon(config: SpeederConfig) -> Result<()> {
    let sink = build_sink(&config.notifications)?;
    let tracker = Arc::new(SpeedTracker::from_config(&config, sink, Handle::current()));
    let (shutdown_tx, _) = broadcast::channel(4);

    let reaper = spawn_reaper(tracker.clone(), shutdown_tx.subscribe());
    tracker.announce_startup();

    let feed = match &config.feed.scenario {
        Some(path) => {
            let feed = ReplayFeed::from_path(path)
                .with_context(|| format!("unable to load scenario {}", path.display()))?;
            Some(spawn_feed(
                feed,
                tracker.clone(),
                config.feed.replay_speedup,
                shutdown_tx.subscribe(),
            ))
        }
        None => {
            info!("no scenario configured; waiting for telemetry");
            None
        }
    };

    info!("daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");
    let _ = shutdown_tx.send(());

    if let Some(feed) = feed {
        let stats = feed.await?;
        info!(
            samples = stats.samples,
            events = stats.events,
            interrupted = stats.interrupted,
            "scenario feed stopped"
        );
    }
    reaper.await?;
    info!(
        active_sessions = tracker.active_sessions(),
        "speed monitor stopped"
    );
    Ok(())
}

async fn check_scenario(config: &SpeederConfig, path: &Path) -> Result<()> {
    let feed = ReplayFeed::from_path(path)
        .with_context(|| format!("unable to load scenario {}", path.display()))?;
    let tracker = SpeedTracker::from_config(config, Arc::new(LogSink), Handle::current());
    let (_shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
    let stats = feed.run(&tracker, f64::INFINITY, &mut shutdown_rx).await;

    println!(
        "Records: {}\nSkipped rows: {}\nSamples: {}\nEvents: {}",
        feed.len(),
        feed.skipped(),
        stats.samples,
        stats.events
    );
    for session in tracker.sessions() {
        println!(
            "Train {} [{:?}] {} / {} active={} speeding={:?}",
            session.train_id,
            session.controller_kind,
            session.engineer,
            session.symbol,
            session.active,
            session.speeding
        );
    }
    Ok(())
}
