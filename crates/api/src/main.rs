//! BlinkSense - Main Entry Point

use std::io;
use std::sync::Arc;
use std::time::Duration;

use alerting::{FallbackChain, ShutdownMode};
use anyhow::Context;
use api::{create_router, init_logging, AppConfig, AppState};
use camera_capture::FrameSource;
use dms::Perception;
use metrics_exporter_prometheus::PrometheusBuilder;
use pipeline::landmark_feed::{self, DetachedReader};
use pipeline::{DetectorSession, PipelineError, SessionParts, Signal, WatchPublisher};
use tracing::{info, warn};

/// Upper bound on waiting for the acquisition loop after shutdown is requested
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;
    init_logging(&config.logging)?;

    info!("=== BlinkSense v{} ===", env!("CARGO_PKG_VERSION"));

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;

    // Ends a stdin feed that is blocked waiting for input
    let feed_stop = Signal::new();
    let (source, perception): (Box<dyn FrameSource>, Box<dyn Perception>) =
        match &config.feed.path {
            Some(path) => {
                let (source, perception) = landmark_feed::open_path(path).with_context(|| {
                    format!("failed to open landmark feed {}", path.display())
                })?;
                (Box::new(source), Box::new(perception))
            }
            None => {
                info!("Reading landmark feed from stdin");
                let reader = DetachedReader::spawn(io::stdin(), feed_stop.clone())
                    .context("failed to start stdin reader")?;
                let (source, perception) = landmark_feed::open(reader);
                (Box::new(source), Box::new(perception))
            }
        };

    let sink = FallbackChain::from_specs(&config.alert.sinks);
    let (publisher, frames) = WatchPublisher::channel();
    let session = DetectorSession::start(
        config.detector.clone(),
        SessionParts {
            source,
            perception,
            sink: Arc::new(sink),
            publisher: Box::new(publisher),
        },
    )
    .context("failed to start detector session")?;
    let session = Arc::new(session);

    let state = Arc::new(
        AppState::new(Arc::clone(&session))
            .with_frames(frames)
            .with_metrics(metrics),
    );
    let app = create_router(state);

    let addr = config.server.addr();
    info!("Starting API server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    feed_stop.raise();
    match tokio::time::timeout(STOP_TIMEOUT, session.stop(ShutdownMode::Stop)).await {
        Ok(Ok(exit)) => info!("Detector stopped: {:?}", exit),
        Ok(Err(PipelineError::NotRunning)) => {}
        Ok(Err(e)) => warn!("Detector ended with error: {}", e),
        Err(_) => warn!("Detector did not stop within {:?}", STOP_TIMEOUT),
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
