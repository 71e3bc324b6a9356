use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Caption generation failed: {0}")]
    CaptionFailed(String),

    #[error("Caption generation timed out")]
    CaptionTimeout,

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
        }

        let (status, error_message) = match self {
            AppError::BadRequest(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            AppError::CaptionFailed(reason) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error generating caption: {}", reason),
            ),
            AppError::CaptionTimeout => (
                StatusCode::GATEWAY_TIMEOUT,
                "Caption generation timed out".to_string(),
            ),
            AppError::InternalError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error processing image: {}", err),
            ),
            AppError::ConfigError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Configuration error: {}", err),
            ),
        };

        (status, Json(ErrorResponse { error: error_message })).into_response()
    }
}
