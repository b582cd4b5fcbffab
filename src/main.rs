//! Valet gate - gate prediction and vehicle dispatch service
//!
//! Scores a user's approach to each pickup gate from mobile sensor data and
//! decides when to dispatch their vehicle, redirect it, or flag a lost signal.
//!
//! Module structure:
//! - `domain/` - Core types (gates, scores, dispatch records)
//! - `services/` - Business logic (fusion, scoring, history, decision engine)
//! - `io/` - External interfaces (HTTP API, MQTT egress)
//! - `infra/` - Infrastructure (Config, Metrics, Clock)

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use valet_gate::infra::{Config, Metrics, SystemClock};
use valet_gate::io::{
    create_egress_channel, report_metrics, start_http_server, HttpState, MqttPublisher,
};
use valet_gate::services::GatePredictor;

/// Valet gate - pickup gate prediction and dispatch
#[derive(Parser, Debug)]
#[command(name = "valet-gate", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for per-submission detail
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), git_hash = env!("GIT_HASH"), "valet_gate_starting");

    let args = Args::parse();

    let config = Config::load_from_path(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config))?;

    let gate_ids: Vec<&str> = config.gates().iter().map(|g| g.as_str()).collect();
    let engine = config.engine();
    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        gates = ?gate_ids,
        confidence_threshold = engine.confidence_threshold,
        min_spacing_ms = engine.min_spacing_ms,
        max_spacing_ms = engine.max_spacing_ms,
        signal_loss_ms = engine.signal_loss_ms,
        in_transit_after_ms = ?engine.in_transit_after_ms,
        history_capacity = config.history_capacity(),
        fusion = ?config.fusion_mode(),
        http_port = config.http_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    let mut predictor = GatePredictor::from_config(&config, Arc::new(SystemClock::new()), metrics.clone());

    // Create MQTT egress channel and publisher (if enabled)
    let egress = if config.mqtt_egress_enabled() {
        let (egress_sender, egress_rx) =
            create_egress_channel(1000, config.site_id().to_string(), metrics.clone());

        let publisher = MqttPublisher::new(&config, egress_rx);
        let publisher_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        });

        predictor = predictor.with_egress(egress_sender.clone());
        Some(egress_sender)
    } else {
        None
    };

    let predictor = Arc::new(predictor);
    info!(fusion = predictor.fusion_name(), "predictor_started");

    // Start metrics reporter; the same window is logged and published
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            report_metrics(&metrics_clone, egress.as_ref());
        }
    });

    // Start HTTP API (if port > 0)
    let http_task = if config.http_port() > 0 {
        let state = HttpState {
            predictor: predictor.clone(),
            metrics: metrics.clone(),
            site_id: config.site_id().to_string(),
            prometheus_enabled: config.prometheus_enabled(),
        };
        let port = config.http_port();
        let http_shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = start_http_server(port, state, http_shutdown).await {
                error!(error = %e, "http_server_error");
            }
        }))
    } else {
        None
    };

    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);

    if let Some(task) = http_task {
        let _ = task.await;
    }
    // Let the egress publisher drain
    tokio::time::sleep(Duration::from_millis(200)).await;

    info!(users = predictor.sessions().user_count(), "valet_gate_shutdown_complete");
    Ok(())
}
