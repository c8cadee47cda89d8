use axum::{
    Json,
    extract::multipart::{MultipartError, MultipartRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use detector::DetectorError;
use serde_json::json;
use thiserror::Error;

/// Errors returned to HTTP clients as `{"error": "<message>"}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No file part 'image'")]
    MissingFile,

    #[error("No selected file")]
    EmptyFilename,

    #[error("Invalid multipart body: {0}")]
    Rejection(#[from] MultipartRejection),

    #[error("Invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),

    #[error(transparent)]
    Detector(#[from] DetectorError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingFile | Self::EmptyFilename => StatusCode::BAD_REQUEST,
            Self::Rejection(rejection) => rejection.status(),
            Self::Multipart(err) => err.status(),
            Self::Detector(DetectorError::Decode(_)) => StatusCode::BAD_REQUEST,
            Self::Detector(DetectorError::Load(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Detector(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Label used for the request outcome metric.
    pub fn outcome(&self) -> &'static str {
        match self.status() {
            StatusCode::SERVICE_UNAVAILABLE => "unavailable",
            status if status.is_client_error() => "client_error",
            _ => "server_error",
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Detector(DetectorError::Load(err)) => format!("Model unavailable: {:#}", err),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %message, "Request failed");
        } else {
            tracing::warn!(status = status.as_u16(), error = %message, "Request rejected");
        }

        (status, Json(json!({ "error": message }))).into_response()
    }
}
