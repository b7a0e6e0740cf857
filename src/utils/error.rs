//! Error handling for vidgrab

use crate::downloader::classify::{analyze_error, ErrorAnalysis, ErrorKind};
use thiserror::Error;

/// Main error type for vidgrab
#[derive(Debug, Error)]
pub enum VidgrabError {
    #[error("yt-dlp not found. Please install yt-dlp")]
    YtDlpNotFound,

    #[error("Failed to extract video: {0}")]
    ExtractionError(String),

    #[error("{}", .analysis.user_message)]
    CascadeExhausted {
        attempts: usize,
        last_error: String,
        analysis: ErrorAnalysis,
    },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Download not found: {0}")]
    JobNotFound(String),

    #[error("File missing or already cleaned up: {0}")]
    FileMissing(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl VidgrabError {
    /// Classification shown to users.
    ///
    /// Only extractor and OS text goes through keyword analysis; errors raised
    /// by vidgrab itself map to a fixed kind.
    pub fn analysis(&self) -> ErrorAnalysis {
        match self {
            VidgrabError::CascadeExhausted { analysis, .. } => analysis.clone(),
            VidgrabError::ExtractionError(raw) => analyze_error(raw),
            VidgrabError::InvalidUrl(_) => ErrorAnalysis::new(ErrorKind::InvalidUrl),
            VidgrabError::NetworkError(e) if e.is_timeout() => {
                ErrorAnalysis::new(ErrorKind::NetworkTimeout)
            }
            VidgrabError::NetworkError(_) => ErrorAnalysis::new(ErrorKind::NetworkError),
            VidgrabError::IoError(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                ErrorAnalysis::new(ErrorKind::PermissionDenied)
            }
            VidgrabError::IoError(e) => analyze_error(&e.to_string()),
            VidgrabError::SerializationError(_) => ErrorAnalysis::new(ErrorKind::JsonError),
            VidgrabError::YtDlpNotFound
            | VidgrabError::JobNotFound(_)
            | VidgrabError::FileMissing(_)
            | VidgrabError::OperationFailed(_) => ErrorAnalysis::new(ErrorKind::Unknown),
        }
    }
}
