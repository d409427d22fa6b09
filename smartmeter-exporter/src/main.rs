//! Prometheus exporter for ECHONET Lite smart meters.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use smartmeter_common::init_tracing;
use smartmeter_device::SmartMeterClient;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use smartmeter_exporter::{
    ExporterArgs, ExporterConfig, HttpServer, MetricsSink, ScrapeOrchestrator, ScrapeOutcome,
    ScrapeScheduler, effective_interval,
};

/// Grace period for in-flight HTTP requests at shutdown.
const HTTP_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ExporterArgs::parse();

    // Load configuration, then let flags and environment override it
    let mut config = match &args.config {
        Some(path) => ExporterConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ExporterConfig::default(),
    };
    config.apply_args(&args);

    init_tracing(&config.logging)?;

    config.validate().context("Invalid configuration")?;

    info!("Starting smart meter exporter");

    let interval = effective_interval(config.scrape.interval_secs);
    let listen_addr = config.http.listen_addr()?;

    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", listen_addr))?;

    let client = SmartMeterClient::open(config.device.clone())
        .await
        .with_context(|| format!("Failed to initialize modem on {}", config.device.port))?;

    let sink = Arc::new(MetricsSink::new());

    // Scheduler and HTTP server stop independently
    let (scrape_shutdown_tx, scrape_shutdown_rx) = watch::channel(false);
    let (http_shutdown_tx, http_shutdown_rx) = watch::channel(false);

    let scheduler = ScrapeScheduler::new(ScrapeOrchestrator::new(client, sink.clone()), interval);
    let scrape_task = tokio::spawn(scheduler.run(scrape_shutdown_rx));

    let http_server = HttpServer::new(sink.clone(), config.http.path.clone());
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.serve(listener, http_shutdown_rx).await {
            error!("HTTP server error: {}", e);
        }
    });

    let signal = shutdown_signal().await;
    info!(signal, "Shutting down");

    // Let the scrape in progress finish before the endpoint goes away
    let _ = scrape_shutdown_tx.send(true);
    if let Err(e) = scrape_task.await {
        error!("Scrape task failed: {}", e);
    }

    let _ = http_shutdown_tx.send(true);
    if tokio::time::timeout(HTTP_SHUTDOWN_GRACE, http_task)
        .await
        .is_err()
    {
        warn!(
            grace_secs = HTTP_SHUTDOWN_GRACE.as_secs(),
            "HTTP server did not stop in time"
        );
    }

    // Print final stats
    info!(
        scrapes = sink.scrape_count(),
        ip_resolve_errors = sink.error_count(ScrapeOutcome::IpResolveFailure),
        auth_errors = sink.error_count(ScrapeOutcome::AuthFailure),
        query_errors = sink.error_count(ScrapeOutcome::QueryFailure),
        parse_errors = sink.error_count(ScrapeOutcome::ParseFailure),
        "Final statistics"
    );

    info!("Exporter stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM and name the one received.
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}
