use crate::utils::error::VidgrabError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// JSON error returned by every handler
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub error_type: Option<&'static str>,
    pub fatal: Option<bool>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            error_type: None,
            fatal: None,
        }
    }
}

impl From<VidgrabError> for ApiError {
    fn from(err: VidgrabError) -> Self {
        match err {
            VidgrabError::InvalidUrl(_) => Self::bad_request(err.to_string()),
            VidgrabError::JobNotFound(_) | VidgrabError::FileMissing(_) => {
                Self::not_found(err.to_string())
            }
            VidgrabError::YtDlpNotFound => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            VidgrabError::CascadeExhausted { .. } | VidgrabError::ExtractionError(_) => {
                let analysis = err.analysis();
                Self {
                    status: StatusCode::BAD_REQUEST,
                    error_type: Some(analysis.kind.as_str()),
                    fatal: Some(analysis.fatal),
                    message: analysis.user_message,
                }
            }
            other => Self::internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({ "error": self.message });
        if let Some(error_type) = self.error_type {
            body["error_type"] = json!(error_type);
        }
        if let Some(fatal) = self.fatal {
            body["fatal"] = json!(fatal);
        }
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
