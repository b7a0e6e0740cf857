//! Cascade download engine
//!
//! Runs the platform's strategies one after another until one of them leaves
//! a usable video file behind. Every attempt gets its own `dl_<n>` directory
//! so leftovers of a failed attempt never get mistaken for the result.

use crate::downloader::classify::{analyze_error, ErrorAnalysis};
use crate::downloader::postprocess;
use crate::downloader::progress::{format_speed, JobStatus, ProgressTracker, ProgressUpdate};
use crate::downloader::strategy::Strategy;
use crate::extractor::models::Platform;
use crate::extractor::traits::{ExtractJob, Extractor};
use crate::utils::error::VidgrabError;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Extensions accepted as a finished download
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mkv", "avi", "mov", "flv", "m4v"];
/// Anything smaller is an error page or an empty stub
const MIN_VIDEO_BYTES: u64 = 1024;

const MIB: u64 = 1024 * 1024;

/// Rough quality label derived from the final file size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    High,
    Medium,
    Standard,
}

impl QualityTier {
    pub fn from_size(bytes: u64) -> Self {
        if bytes > 50 * MIB {
            QualityTier::High
        } else if bytes > 20 * MIB {
            QualityTier::Medium
        } else {
            QualityTier::Standard
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::High => "high",
            QualityTier::Medium => "medium",
            QualityTier::Standard => "standard",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to download and where
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub platform: Platform,
    pub job_dir: PathBuf,
    pub cookie_file: Option<PathBuf>,
}

/// A successful cascade run
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub strategy: String,
    pub quality: QualityTier,
    pub elapsed: Duration,
    pub avg_speed: String,
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub strategy_pause: Duration,
    pub mobile_audio_fix: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strategy_pause: Duration::from_millis(500),
            mobile_audio_fix: false,
        }
    }
}

/// Runs strategy cascades through an [`Extractor`]
pub struct DownloadEngine {
    extractor: Arc<dyn Extractor>,
    config: EngineConfig,
}

impl DownloadEngine {
    pub fn new(extractor: Arc<dyn Extractor>, config: EngineConfig) -> Self {
        Self { extractor, config }
    }

    pub fn extractor(&self) -> &Arc<dyn Extractor> {
        &self.extractor
    }

    /// Run the cascade for `request`, reporting progress on `progress_tx`
    pub async fn run(
        &self,
        request: &DownloadRequest,
        progress_tx: mpsc::Sender<ProgressUpdate>,
    ) -> Result<DownloadOutcome, VidgrabError> {
        let started = Instant::now();
        tokio::fs::create_dir_all(&request.job_dir).await?;

        report(
            &progress_tx,
            ProgressUpdate::new(JobStatus::Starting, 5.0).with_message("Analyzing video link..."),
        )
        .await;
        report(
            &progress_tx,
            ProgressUpdate::new(JobStatus::Downloading, 30.0)
                .with_message("Connecting to video server..."),
        )
        .await;

        let cascade = Strategy::cascade(request.platform);
        let total = cascade.len();
        let mut attempts = 0;
        let mut last_error: Option<(String, ErrorAnalysis)> = None;

        for (i, strategy) in cascade.into_iter().enumerate() {
            attempts += 1;
            let attempt_dir = request.job_dir.join(format!("dl_{}", i + 1));
            tokio::fs::create_dir_all(&attempt_dir).await?;

            info!("Trying strategy {}/{}: {}", i + 1, total, strategy.name);
            if i == 0 {
                report(
                    &progress_tx,
                    ProgressUpdate::new(JobStatus::Downloading, 50.0)
                        .with_message("Downloading video...")
                        .with_strategy(strategy.name),
                )
                .await;
            }

            let job = ExtractJob {
                url: request.url.clone(),
                strategy: strategy.clone(),
                output_template: attempt_dir.join("%(title)s.%(ext)s"),
                cookie_file: request.cookie_file.clone(),
            };

            let result = self.attempt(&job, &progress_tx).await;

            let found = match &result {
                Ok(()) => match find_largest_video(&attempt_dir).await {
                    Ok(found) => found,
                    Err(e) => {
                        warn!("Could not scan {}: {}", attempt_dir.display(), e);
                        None
                    }
                },
                Err(_) => None,
            };

            if let Some((file, size)) = found {
                let path = move_into(&file, &request.job_dir).await?;
                remove_attempt_dir(&attempt_dir).await;

                let path = if self.config.mobile_audio_fix {
                    report(
                        &progress_tx,
                        ProgressUpdate::new(JobStatus::Processing, 97.0)
                            .with_message("Optimizing audio for mobile playback..."),
                    )
                    .await;
                    postprocess::fix_for_mobile(&path).await
                } else {
                    path
                };
                let size_bytes = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(size);

                let elapsed = started.elapsed();
                let outcome = DownloadOutcome {
                    path,
                    size_bytes,
                    strategy: strategy.name.to_string(),
                    quality: QualityTier::from_size(size_bytes),
                    elapsed,
                    avg_speed: format_speed(size_bytes as f64 / elapsed.as_secs_f64().max(0.001)),
                };
                info!(
                    "Strategy '{}' succeeded: {} ({:.1} MB, {}) in {:.1}s",
                    outcome.strategy,
                    outcome.path.display(),
                    outcome.size_bytes as f64 / MIB as f64,
                    outcome.quality,
                    outcome.elapsed.as_secs_f64()
                );
                return Ok(outcome);
            }

            remove_attempt_dir(&attempt_dir).await;

            match result {
                Ok(()) => {
                    warn!("Strategy '{}' finished without a video file", strategy.name);
                }
                Err(e) => {
                    let analysis = e.analysis();
                    let message = match e {
                        VidgrabError::ExtractionError(m) => m,
                        other => other.to_string(),
                    };
                    warn!(
                        "Strategy '{}' failed ({}): {}",
                        strategy.name,
                        analysis.kind.as_str(),
                        message
                    );
                    let fatal = analysis.fatal;
                    last_error = Some((message, analysis));
                    if fatal {
                        info!("Error is fatal, skipping remaining strategies");
                        break;
                    }
                }
            }

            if i + 1 < total && !self.config.strategy_pause.is_zero() {
                tokio::time::sleep(self.config.strategy_pause).await;
            }
        }

        let (last_error, analysis) = last_error.unwrap_or_else(|| {
            let message = "download failed".to_string();
            let analysis = analyze_error(&message);
            (message, analysis)
        });
        Err(VidgrabError::CascadeExhausted {
            attempts,
            last_error,
            analysis,
        })
    }

    /// Run one extractor call, feeding its events through a fresh tracker
    async fn attempt(
        &self,
        job: &ExtractJob,
        progress_tx: &mpsc::Sender<ProgressUpdate>,
    ) -> Result<(), VidgrabError> {
        let (event_tx, mut event_rx) = mpsc::channel(64);
        let strategy_name = job.strategy.name;

        let forward = async {
            let mut tracker = ProgressTracker::new();
            while let Some(event) = event_rx.recv().await {
                debug!("extractor event: {:?}", event);
                if let Some(update) = tracker.update(&event) {
                    report(progress_tx, update.with_strategy(strategy_name)).await;
                }
            }
        };

        let (result, ()) = tokio::join!(self.extractor.download(job, event_tx), forward);
        result
    }
}

async fn report(progress_tx: &mpsc::Sender<ProgressUpdate>, update: ProgressUpdate) {
    // a dropped receiver only means nobody is polling progress any more
    let _ = progress_tx.send(update).await;
}

/// Largest video file directly inside `dir`
pub async fn find_largest_video(dir: &Path) -> Result<Option<(PathBuf, u64)>, VidgrabError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut best: Option<(PathBuf, u64)> = None;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_video = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if !is_video {
            continue;
        }

        let metadata = entry.metadata().await?;
        if !metadata.is_file() || metadata.len() <= MIN_VIDEO_BYTES {
            continue;
        }

        if best.as_ref().map_or(true, |(_, size)| metadata.len() > *size) {
            best = Some((path, metadata.len()));
        }
    }

    Ok(best)
}

/// Move `file` into `dir`, replacing a file of the same name
async fn move_into(file: &Path, dir: &Path) -> Result<PathBuf, VidgrabError> {
    let name = file
        .file_name()
        .ok_or_else(|| VidgrabError::OperationFailed(format!("no file name: {}", file.display())))?;
    let target = dir.join(name);

    if tokio::fs::try_exists(&target).await? {
        tokio::fs::remove_file(&target).await?;
    }
    tokio::fs::rename(file, &target).await?;
    debug!("Moved {} -> {}", file.display(), target.display());
    Ok(target)
}

async fn remove_attempt_dir(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", dir.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::progress::ExtractorEvent;
    use crate::extractor::models::VideoInfo;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Fails with the queued messages, then writes a file
    struct ScriptedExtractor {
        failures: Vec<&'static str>,
        file_size: usize,
        calls: AtomicUsize,
    }

    impl ScriptedExtractor {
        fn new(failures: Vec<&'static str>, file_size: usize) -> Self {
            Self {
                failures,
                file_size,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Extractor for ScriptedExtractor {
        fn id(&self) -> &'static str {
            "scripted"
        }

        async fn probe(&self, _url: &str) -> Result<VideoInfo, VidgrabError> {
            Ok(VideoInfo::default())
        }

        async fn download(
            &self,
            job: &ExtractJob,
            events: mpsc::Sender<ExtractorEvent>,
        ) -> Result<(), VidgrabError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(message) = self.failures.get(call) {
                return Err(VidgrabError::ExtractionError(message.to_string()));
            }

            let dir = job.output_template.parent().unwrap();
            let _ = events
                .send(ExtractorEvent::Downloading {
                    downloaded_bytes: 50,
                    total_bytes: Some(100),
                    speed: Some(1024.0),
                })
                .await;
            tokio::fs::write(dir.join("Video.mp4"), vec![0u8; self.file_size])
                .await
                .unwrap();
            tokio::fs::write(dir.join("Video.f30280.m4a"), vec![0u8; 4096])
                .await
                .unwrap();
            let _ = events.send(ExtractorEvent::Finished { filename: None }).await;
            Ok(())
        }
    }

    fn engine(extractor: Arc<ScriptedExtractor>) -> DownloadEngine {
        DownloadEngine::new(
            extractor,
            EngineConfig {
                strategy_pause: Duration::ZERO,
                mobile_audio_fix: false,
            },
        )
    }

    fn request(dir: &Path, platform: Platform) -> DownloadRequest {
        DownloadRequest {
            url: "https://www.bilibili.com/video/BV1xx411c7mD".to_string(),
            platform,
            job_dir: dir.join("job"),
            cookie_file: None,
        }
    }

    async fn drain(mut rx: mpsc::Receiver<ProgressUpdate>) -> Vec<ProgressUpdate> {
        let mut updates = Vec::new();
        while let Some(u) = rx.recv().await {
            updates.push(u);
        }
        updates
    }

    #[test]
    fn test_quality_tier() {
        assert_eq!(QualityTier::from_size(51 * MIB), QualityTier::High);
        assert_eq!(QualityTier::from_size(50 * MIB), QualityTier::Medium);
        assert_eq!(QualityTier::from_size(21 * MIB), QualityTier::Medium);
        assert_eq!(QualityTier::from_size(20 * MIB), QualityTier::Standard);
        assert_eq!(QualityTier::Medium.to_string(), "medium");
    }

    #[tokio::test]
    async fn test_first_strategy_success() {
        let temp = TempDir::new().unwrap();
        let extractor = Arc::new(ScriptedExtractor::new(vec![], 8192));
        let (tx, rx) = mpsc::channel(64);

        let outcome = engine(extractor.clone())
            .run(&request(temp.path(), Platform::Bilibili), tx)
            .await
            .unwrap();

        assert_eq!(outcome.path, temp.path().join("job").join("Video.mp4"));
        assert_eq!(outcome.size_bytes, 8192);
        assert_eq!(outcome.quality, QualityTier::Standard);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
        assert!(!temp.path().join("job").join("dl_1").exists());

        let percents: Vec<f64> = drain(rx).await.iter().map(|u| u.percent).collect();
        assert_eq!(percents, vec![5.0, 30.0, 50.0, 50.0, 95.0]);
    }

    #[tokio::test]
    async fn test_falls_through_to_next_strategy() {
        let temp = TempDir::new().unwrap();
        let extractor = Arc::new(ScriptedExtractor::new(
            vec!["ERROR: HTTP Error 412: Precondition Failed"],
            4096,
        ));
        let (tx, _rx) = mpsc::channel(64);

        let outcome = engine(extractor.clone())
            .run(&request(temp.path(), Platform::Bilibili), tx)
            .await
            .unwrap();

        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.strategy, Strategy::cascade(Platform::Bilibili)[1].name);
    }

    #[tokio::test]
    async fn test_fatal_error_stops_cascade() {
        let temp = TempDir::new().unwrap();
        let extractor = Arc::new(ScriptedExtractor::new(
            vec!["ERROR: This video is private", "unreachable"],
            4096,
        ));
        let (tx, _rx) = mpsc::channel(64);

        let err = engine(extractor.clone())
            .run(&request(temp.path(), Platform::Bilibili), tx)
            .await
            .unwrap_err();

        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
        match err {
            VidgrabError::CascadeExhausted { attempts, analysis, .. } => {
                assert_eq!(attempts, 1);
                assert!(analysis.fatal);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_all_strategies_exhausted() {
        let temp = TempDir::new().unwrap();
        let extractor = Arc::new(ScriptedExtractor::new(
            vec!["timed out", "timed out", "timed out"],
            4096,
        ));
        let (tx, _rx) = mpsc::channel(64);

        let err = engine(extractor.clone())
            .run(&request(temp.path(), Platform::YouTube), tx)
            .await
            .unwrap_err();

        assert_eq!(extractor.calls.load(Ordering::SeqCst), 3);
        match err {
            VidgrabError::CascadeExhausted {
                attempts,
                last_error,
                ..
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error, "timed out");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tiny_files_are_ignored() {
        let temp = TempDir::new().unwrap();
        // every attempt "succeeds" but leaves only a stub
        let extractor = Arc::new(ScriptedExtractor::new(vec![], 100));
        let (tx, _rx) = mpsc::channel(64);

        let err = engine(extractor.clone())
            .run(&request(temp.path(), Platform::YouTube), tx)
            .await
            .unwrap_err();

        assert_eq!(extractor.calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, VidgrabError::CascadeExhausted { .. }));
    }

    /// First attempt replaces its own directory with a plain file
    struct DirClobberingExtractor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Extractor for DirClobberingExtractor {
        fn id(&self) -> &'static str {
            "clobbering"
        }

        async fn probe(&self, _url: &str) -> Result<VideoInfo, VidgrabError> {
            Ok(VideoInfo::default())
        }

        async fn download(
            &self,
            job: &ExtractJob,
            _events: mpsc::Sender<ExtractorEvent>,
        ) -> Result<(), VidgrabError> {
            let dir = job.output_template.parent().unwrap();
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::fs::remove_dir_all(dir).await.unwrap();
                tokio::fs::write(dir, b"not a directory").await.unwrap();
            } else {
                tokio::fs::write(dir.join("Video.mp4"), vec![0u8; 8192]).await.unwrap();
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_unreadable_attempt_dir_moves_on() {
        let temp = TempDir::new().unwrap();
        let extractor = Arc::new(DirClobberingExtractor { calls: AtomicUsize::new(0) });
        let engine = DownloadEngine::new(
            extractor.clone(),
            EngineConfig {
                strategy_pause: Duration::ZERO,
                mobile_audio_fix: false,
            },
        );
        let (tx, _rx) = mpsc::channel(64);

        let outcome = engine
            .run(&request(temp.path(), Platform::YouTube), tx)
            .await
            .unwrap();

        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.strategy, Strategy::cascade(Platform::YouTube)[1].name);
        assert_eq!(outcome.size_bytes, 8192);
    }

    #[tokio::test]
    async fn test_find_largest_video() {
        let temp = TempDir::new().unwrap();
        tokio::fs::write(temp.path().join("a.mp4"), vec![0u8; 2000]).await.unwrap();
        tokio::fs::write(temp.path().join("b.MKV"), vec![0u8; 3000]).await.unwrap();
        tokio::fs::write(temp.path().join("c.part"), vec![0u8; 9000]).await.unwrap();

        let (path, size) = find_largest_video(temp.path()).await.unwrap().unwrap();
        assert_eq!(path, temp.path().join("b.MKV"));
        assert_eq!(size, 3000);

        assert!(find_largest_video(&temp.path().join("missing")).await.unwrap().is_none());
    }
}
