use crate::{error::ApiError, state::AppState};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartRejection},
    response::Html,
    routing::{get, post},
};
use detector::{Detection, DetectorError};
use serde::Serialize;
use std::{
    path::{Component, Path, PathBuf},
    time::Instant,
};
use tower_http::{services::ServeDir, trace::TraceLayer};

const UPLOAD_FIELD: &str = "image";
const INDEX_HTML: &str = include_str!("../templates/index.html");

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub detections: Vec<Detection>,
    pub image_url: String,
}

pub fn build_router(state: AppState) -> Router {
    let static_files = ServeDir::new(&state.static_dir);
    let body_limit = DefaultBodyLimit::max(state.max_upload_bytes);

    Router::new()
        .route("/", get(index))
        .route("/predict", post(predict))
        .route("/health", get(health))
        .nest_service("/static", static_files)
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Liveness only. Does not touch the detector.
pub async fn health() -> &'static str {
    "OK"
}

#[tracing::instrument(skip_all)]
pub async fn predict(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictResponse>, ApiError> {
    let started = Instant::now();
    let result = run_predict(&state, multipart).await;

    match &result {
        Ok(response) => {
            let elapsed = started.elapsed().as_secs_f64();
            state
                .metrics
                .record_success(elapsed, response.detections.len());
            tracing::info!(
                detections = response.detections.len(),
                image_url = %response.image_url,
                elapsed_ms = elapsed * 1000.0,
                "Prediction served"
            );
        }
        Err(err) => state.metrics.record_failure(err.outcome()),
    }

    result.map(Json)
}

async fn run_predict(
    state: &AppState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<PredictResponse, ApiError> {
    let multipart = match multipart {
        Ok(multipart) => multipart,
        // Not a multipart request at all, so there is no file part to read
        Err(MultipartRejection::InvalidBoundary(_)) => return Err(ApiError::MissingFile),
        Err(rejection) => return Err(rejection.into()),
    };
    let upload = read_upload(multipart).await?;
    let detector = state.detector.get().await?;
    let output_dir = state.output_dir.clone();

    let (detections, saved) = tokio::task::spawn_blocking(move || {
        let prediction = detector.predict(&upload)?;
        let saved = detector.save_annotated(&prediction.annotated, &output_dir)?;
        Ok::<_, DetectorError>((prediction.detections, saved))
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Prediction task failed: {}", e)))??;

    Ok(PredictResponse {
        detections,
        image_url: image_url(&saved, &state.static_dir),
    })
}

/// Returns the bytes of the first `image` file part.
///
/// A part named `image` without a filename is a plain form value, not a file.
async fn read_upload(mut multipart: Multipart) -> Result<Bytes, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let file_name = field.file_name().map(str::to_owned);
        match file_name.as_deref() {
            None => continue,
            Some("") => return Err(ApiError::EmptyFilename),
            Some(name) => {
                tracing::debug!(file_name = %name, "Reading upload");
                return Ok(field.bytes().await?);
            }
        }
    }

    Err(ApiError::MissingFile)
}

/// Public URL for a saved file.
///
/// Files under the static directory map onto the `/static` route. Anything
/// else is returned as its filesystem path.
pub fn image_url(saved: &Path, static_dir: &Path) -> String {
    match without_cur_dir(saved).strip_prefix(without_cur_dir(static_dir)) {
        Ok(relative) => {
            let parts: Vec<_> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect();
            format!("/static/{}", parts.join("/"))
        }
        Err(_) => saved.to_string_lossy().into_owned(),
    }
}

/// Drops `.` components so `./static/x` and `static/x` compare equal.
fn without_cur_dir(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}
