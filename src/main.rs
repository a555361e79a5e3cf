//! Attendance gateway - event-sourced trip attendance for one school bus
//!
//! Module structure:
//! - `domain/` - Event rows, the attendance book, pure derivations
//! - `io/` - External interfaces (MQTT, event store, push, roster, files)
//! - `services/` - Business logic (Tracker, TripPhase, Geofence, Notifier)
//! - `infra/` - Infrastructure (Config, Metrics, Broker)

use attendance_gateway::infra::{Config, Metrics};
use attendance_gateway::io::{
    create_cdc_channel, CdcPublisher, HttpPush, LocationMonitor, MemoryEventStore, Roster,
};
use attendance_gateway::services::Tracker;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Attendance gateway - school bus trip attendance
#[derive(Parser, Debug)]
#[command(name = "attendance-gateway", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml", env = "CONFIG_FILE")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Log level via RUST_LOG, default INFO
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!("attendance-gateway starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    // Embedded MQTT broker for single-box deployments
    attendance_gateway::infra::broker::start_embedded_broker(&config);

    info!(
        config_file = %config.config_file(),
        bus_id = %config.bus_id(),
        driver_id = %config.driver_id(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        changes_topic = %config.changes_topic(),
        actions_topic = %config.actions_topic(),
        zones = config.zones().len(),
        default_radius_km = %config.default_radius_km(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(Metrics::new());
    let store = Arc::new(MemoryEventStore::new());
    let push = Arc::new(HttpPush::new(&config));
    let roster = Arc::new(Roster::load(std::path::Path::new(config.roster_file()))?);

    // Egress channel and MQTT publisher
    let (cdc_sender, egress_rx) = create_cdc_channel(1000, config.bus_id().to_string());
    let publisher = CdcPublisher::new(&config, egress_rx);
    let publisher_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        publisher.run(publisher_shutdown).await;
    });

    // Tracker event channel (bounded for backpressure)
    let (event_tx, event_rx) = mpsc::channel(1000);

    // CDC/actions subscriber
    let cdc_config = config.clone();
    let cdc_tx = event_tx.clone();
    let cdc_metrics = metrics.clone();
    let cdc_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) =
            attendance_gateway::io::cdc::start_cdc_client(&cdc_config, cdc_tx, cdc_metrics, cdc_shutdown)
                .await
        {
            tracing::error!(error = %e, "CDC client error");
        }
    });

    // Position polling (if a GPS endpoint is configured)
    if !config.position_url().is_empty() {
        let monitor = LocationMonitor::new(&config, event_tx.clone(), metrics.clone());
        let monitor_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            monitor.run(monitor_shutdown).await;
        });
    }

    // Periodic metrics report, logged and published
    let metrics_clone = metrics.clone();
    let metrics_sender = cdc_sender.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            let summary = metrics_clone.report();
            summary.log();
            metrics_sender.send_metrics(summary);
        }
    });

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Run tracker - consumes events until shutdown
    let mut tracker = Tracker::new(config, store, roster, push, metrics, Some(cdc_sender));
    tracker.run(event_rx, shutdown_rx).await;

    info!("attendance-gateway shutdown complete");
    Ok(())
}
