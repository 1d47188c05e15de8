use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;
use thiserror::Error;

/// Failures surfaced to HTTP clients.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("upload exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: usize },
    #[error("malformed multipart body: {0}")]
    Multipart(String),
    #[error("could not decode uploaded image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("pose estimation failed: {0:#}")]
    Estimator(anyhow::Error),
    #[error("could not encode processed image: {0:#}")]
    Encode(anyhow::Error),
    #[error("storage failure: {0}")]
    Storage(#[from] std::io::Error),
    #[error("all pose workers are busy, retry shortly")]
    Busy,
    #[error("pose workers are unavailable")]
    WorkersUnavailable,
}

impl ServiceError {
    /// Short label used for metrics.
    pub(crate) fn label(&self) -> &'static str {
        match self {
            ServiceError::PayloadTooLarge { .. } => "too_large",
            ServiceError::Multipart(_) => "multipart",
            ServiceError::Decode(_) => "decode",
            ServiceError::Estimator(_) => "estimator",
            ServiceError::Encode(_) => "encode",
            ServiceError::Storage(_) => "storage",
            ServiceError::Busy => "busy",
            ServiceError::WorkersUnavailable => "unavailable",
        }
    }
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceError::Multipart(_) | ServiceError::Decode(_) => StatusCode::BAD_REQUEST,
            ServiceError::Busy | ServiceError::WorkersUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ServiceError::Estimator(_) | ServiceError::Encode(_) | ServiceError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}
