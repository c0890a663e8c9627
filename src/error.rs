use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Errors reported by a camera handle or its stream
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("unable to reach camera {address}: {reason}")]
    Unreachable { address: String, reason: String },

    #[error("camera command failed: {0}")]
    Command(String),

    #[error("unable to start stream: {0}")]
    StreamStart(String),

    #[error("unable to get the next frame: {0}")]
    Frame(String),

    #[error("unable to encode frame: {0}")]
    Encode(String),
}

/// Application-wide error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("not supported")]
    NotSupported,

    #[error("unable to create camera: {0}")]
    CameraCreate(CameraError),

    #[error("{0}")]
    Camera(#[from] CameraError),

    #[error("camera did not respond within {0:?}")]
    Timeout(std::time::Duration),

    #[error("stream for {0} is no longer running")]
    StreamStopped(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::NotSupported | AppError::Config(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::CameraCreate(_)
            | AppError::Camera(_)
            | AppError::StreamStopped(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();

        tracing::warn!(
            status = status.as_u16(),
            error_message = %message,
            "Request failed"
        );

        (status, message).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::NotSupported.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::Timeout(std::time::Duration::from_secs(5)).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            AppError::from(CameraError::Command("no route".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_camera_error_message_passthrough() {
        let err = AppError::from(CameraError::StreamStart("connection refused".into()));
        assert_eq!(err.to_string(), "unable to start stream: connection refused");
    }
}
