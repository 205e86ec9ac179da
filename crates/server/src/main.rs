//! Cost model server
//!
//! Serves the aggregated cost model API, exposes the owned metrics
//! registry, and runs the price recording loop against the metrics
//! backend.

use anyhow::Result;
use costmodel::{CostGauges, PriceRecorder, ResultCache};
use costmodel_server::{api, config, pricing, prom};
use prometheus::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting costmodel-server");

    let config = config::ServerConfig::load()?;
    info!(cluster_id = %config.cluster_id, endpoint = %config.prometheus_endpoint, "Server configured");

    let registry = Registry::new();
    let gauges = CostGauges::register(&registry)?;

    let source = Arc::new(prom::PrometheusSource::new(
        &config.prometheus_endpoint,
        config.cluster_id.clone(),
    )?);
    let pricing = Arc::new(pricing::FilePricingProvider::load(
        &config.pricing_config_path,
    )?);

    let recorder = PriceRecorder::new(
        source.clone(),
        source.clone(),
        pricing.clone(),
        gauges,
        Duration::from_secs(config.record_interval_secs),
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let recorder_handle = tokio::spawn(recorder.run(shutdown_rx));

    let state = Arc::new(api::AppState {
        source,
        pricing,
        cache: ResultCache::new(Duration::from_secs(config.cache_ttl_secs)),
        registry,
    });
    let api_handle = tokio::spawn(api::serve(config.api_port, state));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    let _ = shutdown_tx.send(());
    let _ = recorder_handle.await;
    api_handle.abort();

    Ok(())
}
