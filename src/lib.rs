//! vidgrab library

pub mod downloader;
pub mod extractor;
pub mod queue;
pub mod server;
pub mod utils;

// Re-export main types for easier use
pub use downloader::{DownloadEngine, DownloadOutcome, JobStatus, ProgressSnapshot, Strategy};
pub use extractor::{ExtractJob, Extractor, Platform, VideoInfo, YtDlpExtractor};
pub use queue::JobManager;
pub use server::AppState;
pub use utils::{AppSettings, VidgrabError};
