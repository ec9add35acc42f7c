//! Geofence tracker - background location tracking by self-re-centering geofence
//!
//! Runs the tracking service against a simulated platform: a subject walks
//! away from its start position and every zone EXIT re-centers the zone on
//! a fresh fix.
//!
//! Module structure:
//! - `domain/` - Core types (points, zones, transitions, errors)
//! - `io/` - Platform traits, simulator, Prometheus endpoint
//! - `services/` - Controller, fix requester, zone manager, service
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use geofence_tracker::infra::{Config, Metrics};
use geofence_tracker::io::{Platform, SimPlatform};
use geofence_tracker::services::TrackingService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Geofence tracker - re-centers a trigger zone on every exit
#[derive(Parser, Debug)]
#[command(name = "geofence-tracker", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(long)]
    duration_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize structured logging with configurable level via RUST_LOG env var
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_timer(UtcTime::rfc_3339())
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(UtcTime::rfc_3339())
            .with_target(false)
            .init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), git_hash = env!("GIT_HASH"), "geofence-tracker starting");

    let config = Config::load(args.config.as_deref());
    let fix_policy = config.fix_policy();
    info!(
        config_file = %config.config_file(),
        zone_id = %config.zone_id(),
        radius_m = %config.radius_m(),
        interval_ms = %fix_policy.interval.as_millis(),
        priority = %fix_policy.priority.as_str(),
        supersede_after_ms = %config.supersede_after().as_millis(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    let sim = Arc::new(SimPlatform::from_config(config.sim()));
    let platform = Platform::from_shared(sim.clone());

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_shutdown = shutdown_rx.clone();
        let zone = config.zone_id().to_string();
        tokio::spawn(async move {
            if let Err(e) = geofence_tracker::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                zone,
                prom_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    // Periodic metrics summary
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    let mut service = TrackingService::new(config.clone(), platform, metrics.clone());
    let session_id = service.start();
    info!(session_id = %session_id, "tracker_started");

    // Walk the simulated subject
    let walker_sim = sim.clone();
    let sim_config = config.sim().clone();
    let mut walker_shutdown = shutdown_rx.clone();
    let walker = tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_millis(sim_config.step_interval_ms.max(1)));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let position = walker_sim.step(sim_config.step_m, sim_config.turn_deg);
                    tracing::debug!(position = %position, "sim_step");
                }
                _ = walker_shutdown.changed() => break,
            }
        }
    });

    match args.duration_secs {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                    info!(duration_secs = secs, "run_duration_elapsed");
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown_signal_received");
                }
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("shutdown_signal_received");
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = walker.await;
    service.stop().await;
    metrics.report().log();

    info!("geofence-tracker shutdown complete");
    Ok(())
}
