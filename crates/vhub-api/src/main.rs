//! Axum API server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vhub_api::{create_router, metrics, ApiConfig, AppState};
use vhub_engine::backends::{StubModelLoader, SyntheticFrameSource};
use vhub_engine::{AnalysisContext, EngineConfig};
use vhub_models::AnalysisRequest;

const CAMERA_WIDTH: u32 = 640;
const CAMERA_HEIGHT: u32 = 480;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("vhub=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting vhub-api");

    let config = ApiConfig::from_env();
    let engine_config = EngineConfig::from_env();
    info!(
        host = %config.host,
        port = config.port,
        fps = engine_config.fps,
        classifiers = ?engine_config.default_classifiers,
        "Configuration loaded"
    );

    let driver_request = AnalysisRequest::new(engine_config.default_classifiers.clone());
    let context = Arc::new(AnalysisContext::new(
        engine_config,
        Arc::new(StubModelLoader::demo()),
        Arc::new(SyntheticFrameSource::new(CAMERA_WIDTH, CAMERA_HEIGHT)),
    ));
    context
        .initialize()
        .await
        .context("failed to initialize analysis context")?;

    if driver_request.classifiers.is_empty() {
        warn!("No default classifiers configured; periodic analysis disabled");
    } else {
        context.spawn_driver(driver_request);
    }

    let metrics_handle = if config.metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics().context("failed to install Prometheus recorder")?)
    } else {
        None
    };

    let state = AppState::new(config.clone(), Arc::clone(&context));
    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind_address()))?;

    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    context.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for CTRL+C");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
