//! Utility modules for error handling, configuration and file naming

pub mod config;
pub mod error;
pub mod filename;
pub mod platform;

// Re-export for convenience
pub use config::AppSettings;
pub use error::VidgrabError;
pub use filename::{clean_title, fallback_title, sanitize_filename};
