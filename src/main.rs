//! kilnmon Binary Entry Point
//!
//! Polls the configured sensors on a fixed interval and ships the records to
//! InfluxDB until SIGINT or SIGTERM. Core functionality is provided by the
//! `kilnmon` library crate.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kilnmon::{
    clock::SystemClock,
    config::{AppConfig, parse_duration},
    scheduler::Scheduler,
    storage::{BatchWriter, Event, EventSeverity},
};
use tokio::sync::{mpsc, watch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// kilnmon - kiln and shed sensor monitor
#[derive(Parser, Debug)]
#[command(name = "kilnmon", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/kilnmon.yaml",
        env = "KILNMON_CONFIG"
    )]
    config: String,

    /// Polling interval, e.g. "30s" (overrides config file)
    #[arg(short, long, env = "KILNMON_INTERVAL", value_parser = parse_duration)]
    interval: Option<Duration>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,kilnmon=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    tracing::info!(config = %cli.config, "Loading configuration");
    let mut config = AppConfig::load(&cli.config)?;

    // CLI > ENV > config file
    if let Some(interval) = cli.interval {
        if interval.is_zero() {
            return Err("interval must be non-zero".into());
        }
        config.interval = interval;
    }

    tracing::info!(
        url = %config.store.url,
        org = %config.store.org,
        bucket = %config.store.bucket,
        precision = %config.store.precision,
        sensors = config.sensors.len(),
        "Configuration loaded"
    );

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let event_log = tokio::spawn(log_events(events_rx));

    let store = config.store.connect()?;
    let writer = BatchWriter::new(store, config.store.target(), config.writer.clone(), 1)
        .with_events(events_tx.clone());
    let mut scheduler =
        Scheduler::new(config.interval, Arc::new(SystemClock), writer).with_events(events_tx);

    scheduler.initialize(config.sensor_factories()).await?;

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Stopping after the current cycle");
        let _ = stop_tx.send(true);
    });

    let summary = scheduler.run(stop_rx).await?;
    tracing::info!(
        cycles = summary.cycles,
        delivered = summary.records_delivered,
        dropped = summary.records_dropped,
        failed_flushes = summary.failed_flushes,
        "Shutdown complete"
    );

    // The scheduler and writer own the last senders.
    drop(scheduler);
    let _ = event_log.await;
    Ok(())
}

/// Write pipeline events to the log.
async fn log_events(mut events: mpsc::UnboundedReceiver<Event>) {
    while let Some(event) = events.recv().await {
        let payload = event
            .payload
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        match event.severity {
            EventSeverity::Critical | EventSeverity::Error => tracing::error!(
                source = %event.source,
                kind = %event.kind,
                payload = %payload,
                "{}",
                event.message
            ),
            EventSeverity::Warn => tracing::warn!(
                source = %event.source,
                kind = %event.kind,
                payload = %payload,
                "{}",
                event.message
            ),
            EventSeverity::Info | EventSeverity::Debug => tracing::info!(
                source = %event.source,
                kind = %event.kind,
                payload = %payload,
                "{}",
                event.message
            ),
        }
    }
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
