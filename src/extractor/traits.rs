use crate::downloader::progress::ExtractorEvent;
use crate::downloader::strategy::Strategy;
use crate::extractor::models::VideoInfo;
use crate::utils::error::VidgrabError;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// One strategy attempt handed to an extractor
#[derive(Debug, Clone)]
pub struct ExtractJob {
    pub url: String,
    pub strategy: Strategy,
    /// Output template, e.g. `<job dir>/dl_1/%(title)s.%(ext)s`
    pub output_template: PathBuf,
    pub cookie_file: Option<PathBuf>,
}

/// Core trait for video extractors
///
/// The engine only talks to this trait, so tests can swap yt-dlp for a fake
/// that writes files directly.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Returns a unique identifier for this extractor (e.g. "yt-dlp")
    fn id(&self) -> &'static str;

    /// Fetch metadata without downloading
    async fn probe(&self, url: &str) -> Result<VideoInfo, VidgrabError>;

    /// Run one download attempt, reporting events as they happen
    ///
    /// A failed attempt returns [`VidgrabError::ExtractionError`] carrying the
    /// extractor's own error text so it can be classified.
    async fn download(
        &self,
        job: &ExtractJob,
        events: mpsc::Sender<ExtractorEvent>,
    ) -> Result<(), VidgrabError>;
}
