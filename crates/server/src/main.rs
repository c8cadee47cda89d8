use anyhow::Context;
use common::{TelemetryGuard, setup_logging};
use detector::{Detect, DetectorConfig, DetectorError, ObjectDetector};
use server::{AppState, DetectorCell, ServerConfig, build_router, state::DetectorLoader};
use std::sync::Arc;
use tokio::net::TcpListener;

#[cfg(feature = "ort-backend")]
use detector::backend::ort::OrtBackend as Backend;

#[cfg(not(feature = "ort-backend"))]
compile_error!("Enable the ort-backend feature to build the server");

const SERVICE_NAME: &str = "detection-server";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let server_config = ServerConfig::from_env().context("Invalid server configuration")?;
    let detector_config = DetectorConfig::from_env().context("Invalid detector configuration")?;

    let telemetry = server_config
        .otel_endpoint
        .as_deref()
        .map(|endpoint| TelemetryGuard::init(SERVICE_NAME, endpoint, server_config.environment))
        .transpose()?;
    if telemetry.is_none() {
        setup_logging(server_config.environment);
    }

    tracing::info!(
        environment = server_config.environment.as_str(),
        weights = %detector_config.weights_path.display(),
        device = %detector_config.device,
        confidence = detector_config.confidence_threshold,
        iou = detector_config.iou_threshold,
        input_size = detector_config.input_size,
        lazy_load = server_config.lazy_load,
        "Detection server starting"
    );

    let loader: DetectorLoader = Arc::new(move || {
        let detector = ObjectDetector::<Backend>::load(detector_config.clone())?;
        Ok(Arc::new(detector) as Arc<dyn Detect>)
    });

    let detector = if server_config.lazy_load {
        DetectorCell::lazy(loader)
    } else {
        let detector = tokio::task::spawn_blocking(move || loader())
            .await
            .map_err(|e| DetectorError::Load(anyhow::anyhow!("Loader task failed: {}", e)))?
            .context("Failed to load detector at startup")?;
        DetectorCell::ready(detector)
    };

    std::fs::create_dir_all(&server_config.output_dir).with_context(|| {
        format!(
            "Failed to create output directory {}",
            server_config.output_dir.display()
        )
    })?;

    let state = AppState::new(
        detector,
        server_config.static_dir.clone(),
        server_config.output_dir.clone(),
        server_config.max_upload_bytes,
    );
    let app = build_router(state);

    let addr = server_config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(addr = %addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Detection server stopped");
    drop(telemetry);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for SIGTERM"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
