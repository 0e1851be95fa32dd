//! skywatch: watch for aircraft entering a radius around a reference point.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use skywatch_core::config::{self, Config};
use skywatch_core::position::FixedPosition;
use skywatch_core::{enrich, ArrivalEvent, DetectionResult, TickMode};

mod engine;
mod feed;
mod notification;
mod scheduler;
mod web;

use engine::{Engine, EngineSettings, TickOutcome};
use feed::{FeedSource, HttpFeed, ReplayFeed};
use notification::{LogSink, WebhookSink};
use scheduler::Scheduler;

#[derive(Parser)]
#[command(name = "skywatch", version, about = "Overhead aircraft watcher")]
struct Cli {
    /// Config file (default: ~/.skywatch/config.yaml)
    #[arg(long, global = true, env = "SKYWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Reference latitude in decimal degrees
    #[arg(long, global = true, allow_hyphen_values = true)]
    lat: Option<f64>,

    /// Reference longitude in decimal degrees
    #[arg(long, global = true, allow_hyphen_values = true)]
    lon: Option<f64>,

    /// Alert radius in meters
    #[arg(long, global = true)]
    alert_radius: Option<f64>,

    /// Acquisition radius in meters (default: twice the alert radius)
    #[arg(long, global = true)]
    acquisition_radius: Option<f64>,

    /// State-vector API base URL
    #[arg(long, global = true, env = "SKYWATCH_FEED_URL")]
    feed_url: Option<String>,

    /// Webhook URL for arrival alerts
    #[arg(long, global = true, env = "SKYWATCH_WEBHOOK")]
    webhook: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll continuously and alert on arrivals until Ctrl-C
    Watch {
        /// Also serve the read-only HTTP API
        #[arg(long)]
        serve: bool,

        /// API bind host (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// API port (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Run a single detection tick and print the result
    Once {
        /// Read a saved feed response instead of querying the API
        #[arg(long)]
        replay: Option<PathBuf>,
    },

    /// Write the default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(config::config_file);

    if let Commands::InitConfig { force } = cli.command {
        cmd_init_config(&config_path, force);
        return;
    }

    let config = load_effective_config(&cli, &config_path);

    match cli.command {
        Commands::Watch { serve, host, port } => cmd_watch(config, serve, host, port).await,
        Commands::Once { replay } => cmd_once(config, replay).await,
        Commands::InitConfig { .. } => {}
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,skywatch=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

/// Config file plus CLI overrides, validated. Exits on invalid settings.
fn load_effective_config(cli: &Cli, path: &Path) -> Config {
    let mut config = config::load_config_from(path);

    if let Some(lat) = cli.lat {
        config.reference.lat = Some(lat);
    }
    if let Some(lon) = cli.lon {
        config.reference.lon = Some(lon);
    }
    if let Some(r) = cli.alert_radius {
        config.radius.alert_m = r;
        if cli.acquisition_radius.is_none() {
            config.radius.acquisition_m = 2.0 * r;
        }
    }
    if let Some(r) = cli.acquisition_radius {
        config.radius.acquisition_m = r;
    }
    if let Some(url) = &cli.feed_url {
        config.feed.url = url.clone();
    }
    if let Some(url) = &cli.webhook {
        config.webhook = Some(url.clone());
    }

    if let Err(e) = config.validate() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
    if config.reference_coordinate().is_none() {
        eprintln!(
            "Error: no reference position; set reference.lat/lon in {} or pass --lat/--lon",
            path.display()
        );
        std::process::exit(1);
    }
    config
}

fn build_engine(config: &Config, feed: Arc<dyn FeedSource>) -> Engine {
    let mut engine = Engine::new(EngineSettings::from_config(config), feed)
        .with_sink(Arc::new(LogSink));
    if let Some(url) = &config.webhook {
        engine = engine.with_sink(Arc::new(WebhookSink::new(url)));
    }
    engine
}

fn http_feed(config: &Config) -> Arc<dyn FeedSource> {
    match HttpFeed::new(&config.feed.url) {
        Ok(f) => Arc::new(f),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_init_config(path: &Path, force: bool) {
    if path.exists() && !force {
        eprintln!(
            "Config already exists at {} (use --force to overwrite)",
            path.display()
        );
        std::process::exit(1);
    }
    match config::save_config_to(&Config::default(), path) {
        Ok(()) => println!("Wrote {}", path.display()),
        Err(e) => {
            eprintln!("Error writing {}: {e}", path.display());
            std::process::exit(1);
        }
    }
}

async fn cmd_watch(config: Config, serve: bool, host: Option<String>, port: Option<u16>) {
    let Some(reference) = config.reference_coordinate() else {
        return;
    };

    let engine = Arc::new(build_engine(&config, http_feed(&config)));
    let position = Arc::new(FixedPosition {
        coordinate: reference,
    });

    info!(
        reference = %config.reference.name,
        lat = reference.lat,
        lon = reference.lon,
        alert_m = config.radius.alert_m,
        acquisition_m = config.radius.acquisition_m,
        "watching"
    );

    if serve {
        let host = host.unwrap_or_else(|| config.dashboard.host.clone());
        let port = port.unwrap_or(config.dashboard.port);
        let api_engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = web::serve(api_engine, &host, port).await {
                error!("API server stopped: {e}");
            }
        });
    }

    let scheduler = Scheduler::new(
        engine,
        position,
        Duration::from_secs(config.schedule.foreground_secs),
        Duration::from_secs(config.schedule.background_secs),
    );
    scheduler.run(shutdown_signal()).await;
}

async fn cmd_once(config: Config, replay: Option<PathBuf>) {
    let Some(reference) = config.reference_coordinate() else {
        return;
    };

    let feed: Arc<dyn FeedSource> = match replay {
        Some(path) => Arc::new(ReplayFeed::new(path)),
        None => http_feed(&config),
    };
    let engine = build_engine(&config, feed);

    match engine
        .tick(reference, TickMode::Foreground, Instant::now())
        .await
    {
        TickOutcome::Completed { result, events } => {
            print_result(&result, config.radius.alert_m);
            print_events(&events);
        }
        TickOutcome::Skipped(reason) => {
            eprintln!("Tick skipped: {reason:?}");
        }
        TickOutcome::Failed(reason) => {
            eprintln!("Error: {reason}");
            std::process::exit(1);
        }
    }
}

fn print_result(result: &DetectionResult, alert_m: f64) {
    println!();
    println!("{} aircraft within range", result.tracks.len());
    println!();

    if result.tracks.is_empty() {
        return;
    }

    let mut table = Table::new();
    table.set_header(vec![
        "ID", "Callsign", "Dist (km)", "Alt (m)", "Speed (m/s)", "Hdg", "Type", "Country", "Alert",
    ]);

    for r in &result.tracks {
        let t = &r.track;
        table.add_row(vec![
            Cell::new(&t.id),
            Cell::new(t.label.as_deref().unwrap_or("-")),
            Cell::new(format!("{:.1}", r.distance_m / 1000.0)),
            Cell::new(t.altitude_m.map(|a| format!("{a:.0}")).unwrap_or("-".into())),
            Cell::new(t.speed_mps.map(|s| format!("{s:.0}")).unwrap_or("-".into())),
            Cell::new(t.heading_deg.map(|h| format!("{h:.0}")).unwrap_or("-".into())),
            Cell::new(enrich::classify(t)),
            Cell::new(t.origin_country.as_deref().unwrap_or("-")),
            Cell::new(if r.distance_m <= alert_m { "yes" } else { "" }),
        ]);
    }

    println!("{table}");
}

fn print_events(events: &[ArrivalEvent]) {
    if events.is_empty() {
        return;
    }
    println!();
    for ev in events {
        println!("  ARRIVAL  {}", enrich::arrival_message(ev));
    }
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl-C, shutting down"),
        _ = terminate => info!("received terminate signal, shutting down"),
    }
}
