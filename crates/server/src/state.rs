use crate::metrics::PredictMetrics;
use detector::{Detect, DetectorError};
use std::{path::PathBuf, sync::Arc};
use tokio::sync::OnceCell;

pub type DetectorLoader = Arc<dyn Fn() -> Result<Arc<dyn Detect>, DetectorError> + Send + Sync>;

/// Holds the detector, loading it at most once.
///
/// Concurrent first requests wait on the same load. A failed load is not
/// cached and is retried by the next request.
pub struct DetectorCell {
    cell: OnceCell<Arc<dyn Detect>>,
    loader: Option<DetectorLoader>,
}

impl DetectorCell {
    /// Detector already loaded at startup.
    pub fn ready(detector: Arc<dyn Detect>) -> Self {
        Self {
            cell: OnceCell::new_with(Some(detector)),
            loader: None,
        }
    }

    /// Detector loaded on first use.
    pub fn lazy(loader: DetectorLoader) -> Self {
        Self {
            cell: OnceCell::new(),
            loader: Some(loader),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    pub async fn get(&self) -> Result<Arc<dyn Detect>, DetectorError> {
        let detector = self
            .cell
            .get_or_try_init(|| async {
                let loader = self.loader.clone().ok_or_else(|| {
                    DetectorError::Load(anyhow::anyhow!("No detector loader configured"))
                })?;

                tracing::info!("Loading detector on first request");
                tokio::task::spawn_blocking(move || loader())
                    .await
                    .map_err(|e| {
                        DetectorError::Load(anyhow::anyhow!("Loader task failed: {}", e))
                    })?
            })
            .await?;

        Ok(Arc::clone(detector))
    }
}

#[derive(Clone)]
pub struct AppState {
    pub detector: Arc<DetectorCell>,
    pub static_dir: PathBuf,
    pub output_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub metrics: PredictMetrics,
}

impl AppState {
    pub fn new(
        detector: DetectorCell,
        static_dir: PathBuf,
        output_dir: PathBuf,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            detector: Arc::new(detector),
            static_dir,
            output_dir,
            max_upload_bytes,
            metrics: PredictMetrics::new("detection-server"),
        }
    }
}
