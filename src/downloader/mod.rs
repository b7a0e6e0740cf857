//! Download engine module

pub mod classify;
pub mod engine;
pub mod postprocess;
pub mod progress;
pub mod strategy;

// Re-export for convenience
pub use classify::{analyze_error, ErrorAnalysis, ErrorKind};
pub use engine::{DownloadEngine, DownloadOutcome, DownloadRequest, EngineConfig, QualityTier};
pub use progress::{JobStatus, ProgressSnapshot, ProgressUpdate};
pub use strategy::Strategy;
