//! Download job manager with bounded concurrency

use crate::downloader::engine::{DownloadEngine, DownloadRequest, EngineConfig};
use crate::downloader::progress::{JobStatus, ProgressSnapshot, ProgressUpdate};
use crate::extractor::cookies::{CookieJar, BILIBILI_COOKIE_DOMAIN};
use crate::extractor::models::{Platform, VideoInfo};
use crate::extractor::traits::Extractor;
use crate::extractor::url::{normalize, NormalizedUrl, ShortLinkResolver};
use crate::utils::config::AppSettings;
use crate::utils::error::VidgrabError;
use crate::utils::filename::{clean_title, fallback_title, UNKNOWN_TITLE};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One submitted download
#[derive(Debug)]
pub struct Job {
    pub id: String,
    pub url: String,
    pub platform: Platform,
    pub mobile: bool,
    pub snapshot: ProgressSnapshot,
    pub file_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    cleanup_scheduled: bool,
    handle: Option<JoinHandle<()>>,
}

/// Owns every job and the worker tasks running them
#[derive(Clone)]
pub struct JobManager {
    jobs: Arc<Mutex<HashMap<String, Job>>>,
    permits: Arc<Semaphore>,
    engine: Arc<DownloadEngine>,
    resolver: ShortLinkResolver,
    settings: Arc<AppSettings>,
}

impl JobManager {
    pub fn new(settings: AppSettings, extractor: Arc<dyn Extractor>) -> Result<Self, VidgrabError> {
        let engine = DownloadEngine::new(
            extractor,
            EngineConfig {
                strategy_pause: settings.strategy_pause(),
                mobile_audio_fix: settings.mobile_audio_fix,
            },
        );

        Ok(Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            permits: Arc::new(Semaphore::new(settings.max_concurrent.max(1))),
            engine: Arc::new(engine),
            resolver: ShortLinkResolver::new()?,
            settings: Arc::new(settings),
        })
    }

    /// Replace the short link resolver, e.g. to change its retry policy
    pub fn with_resolver(mut self, resolver: ShortLinkResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn extractor(&self) -> &Arc<dyn Extractor> {
        self.engine.extractor()
    }

    fn job_dir(&self, id: &str) -> PathBuf {
        self.settings.work_dir.join(id)
    }

    /// Metadata for `/video-info`, resolving short links first
    pub async fn video_info(&self, input: &str) -> Result<(NormalizedUrl, VideoInfo), VidgrabError> {
        let resolved = self.resolver.resolve(input).await?;
        let info = self.engine.extractor().probe(&resolved.url).await?;
        Ok((resolved, info))
    }

    /// Validate `input`, register a job and start its worker
    pub async fn submit(&self, input: &str, mobile: bool) -> Result<String, VidgrabError> {
        let normalized = normalize(input)?;
        let id = uuid::Uuid::new_v4().to_string();
        let device_type = if mobile { "mobile" } else { "desktop" };

        let job = Job {
            id: id.clone(),
            url: normalized.url.clone(),
            platform: normalized.platform,
            mobile,
            snapshot: ProgressSnapshot::new(device_type),
            file_path: None,
            created_at: Utc::now(),
            finished_at: None,
            cleanup_scheduled: false,
            handle: None,
        };

        let mut jobs = self.jobs.lock().await;
        jobs.insert(id.clone(), job);

        let manager = self.clone();
        let worker_id = id.clone();
        let handle = tokio::spawn(async move {
            manager.run_job(worker_id, normalized).await;
        });
        if let Some(job) = jobs.get_mut(&id) {
            job.handle = Some(handle);
        }

        info!("Accepted job {} ({}) for {}", id, device_type, input);
        Ok(id)
    }

    async fn run_job(&self, id: String, normalized: NormalizedUrl) {
        let Ok(_permit) = self.permits.clone().acquire_owned().await else {
            self.fail(&id, VidgrabError::OperationFailed("job manager shut down".to_string()))
                .await;
            return;
        };
        debug!("Job {} acquired a download slot", id);

        let resolved = match self.resolver.resolve(&normalized.url).await {
            Ok(resolved) => resolved,
            Err(e) => {
                self.fail(&id, e).await;
                return;
            }
        };
        if let Some(warning) = &resolved.warning {
            warn!("Job {}: {}", id, warning);
        }

        self.update(&id, |job| {
            job.url = resolved.url.clone();
            job.platform = resolved.platform;
        })
        .await;

        let title = match self.engine.extractor().probe(&resolved.url).await {
            Ok(info) => clean_title(&info.title),
            Err(e) => {
                warn!("Job {}: title lookup failed, using fallback: {}", id, e);
                UNKNOWN_TITLE.to_string()
            }
        };
        let title = if title == UNKNOWN_TITLE {
            clean_title(&fallback_title(&resolved.url))
        } else {
            title
        };
        info!("Job {}: downloading \"{}\"", id, title);

        let job_dir = self.job_dir(&id);
        let cookie_file = self.write_cookies(&job_dir, resolved.platform).await;

        let request = DownloadRequest {
            url: resolved.url.clone(),
            platform: resolved.platform,
            job_dir: job_dir.clone(),
            cookie_file: cookie_file.clone(),
        };

        let (progress_tx, mut progress_rx) = mpsc::channel::<ProgressUpdate>(64);
        let forward = async {
            while let Some(update) = progress_rx.recv().await {
                self.update(&id, |job| job.snapshot.apply(update)).await;
            }
        };
        let (result, ()) = tokio::join!(self.engine.run(&request, progress_tx), forward);

        if let Some(cookies) = cookie_file {
            let _ = tokio::fs::remove_file(cookies).await;
        }

        match result {
            Ok(outcome) => {
                let path = rename_to_title(&outcome.path, &title).await;
                let filename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let size_mb = outcome.size_bytes as f64 / 1024.0 / 1024.0;

                info!(
                    "Job {} completed: {} ({:.1} MB, {}, avg {})",
                    id, filename, size_mb, outcome.quality, outcome.avg_speed
                );

                self.update(&id, |job| {
                    if job.snapshot.status.is_terminal() {
                        return;
                    }
                    job.file_path = Some(path.clone());
                    job.finished_at = Some(Utc::now());
                    let snapshot = &mut job.snapshot;
                    snapshot.status = JobStatus::Completed;
                    snapshot.percent = 100.0;
                    snapshot.filename = Some(filename.clone());
                    snapshot.downloaded_mb = Some(size_mb);
                    snapshot.strategy = Some(outcome.strategy.clone());
                    snapshot.quality = Some(outcome.quality.to_string());
                    snapshot.speed = Some(outcome.avg_speed.clone());
                    snapshot.message = format!(
                        "Download complete! {:.1} MB, {} quality",
                        size_mb, outcome.quality
                    );
                })
                .await;
            }
            Err(e) => {
                self.fail(&id, e).await;
                remove_dir(&job_dir).await;
            }
        }
    }

    async fn write_cookies(&self, job_dir: &Path, platform: Platform) -> Option<PathBuf> {
        if platform != Platform::Bilibili {
            return None;
        }
        let raw = self.settings.bilibili_cookies.as_deref()?;
        match CookieJar::from_header(raw)
            .write_netscape(job_dir, BILIBILI_COOKIE_DOMAIN)
            .await
        {
            Ok(path) => path,
            Err(e) => {
                warn!("Failed to write cookie file: {}", e);
                None
            }
        }
    }

    async fn fail(&self, id: &str, err: VidgrabError) {
        let analysis = err.analysis();
        error!("Job {} failed: {}", id, err);

        self.update(id, |job| {
            if job.snapshot.status.is_terminal() {
                return;
            }
            job.finished_at = Some(Utc::now());
            let snapshot = &mut job.snapshot;
            snapshot.status = JobStatus::Failed;
            snapshot.error = Some(err.to_string());
            snapshot.error_type = Some(analysis.kind.as_str().to_string());
            snapshot.fatal = analysis.fatal;
            snapshot.message = format!("Download failed: {}", err);
        })
        .await;
    }

    async fn update<F>(&self, id: &str, f: F)
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.get_mut(id) {
            f(job);
        }
    }

    /// Current progress; completed jobs whose file still exists get a download link
    pub async fn snapshot(&self, id: &str) -> Option<ProgressSnapshot> {
        let (mut snapshot, file_path) = {
            let jobs = self.jobs.lock().await;
            let job = jobs.get(id)?;
            (job.snapshot.clone(), job.file_path.clone())
        };

        if snapshot.status == JobStatus::Completed {
            match file_path {
                Some(path) if tokio::fs::try_exists(&path).await.unwrap_or(false) => {
                    snapshot.download_url = Some(format!("/download-file/{}", id));
                }
                _ => {
                    snapshot.message = "File is no longer available".to_string();
                }
            }
        }

        Some(snapshot)
    }

    /// Abort a job, killing its extractor, and remove its files
    pub async fn cancel(&self, id: &str) -> Result<(), VidgrabError> {
        {
            let mut jobs = self.jobs.lock().await;
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| VidgrabError::JobNotFound(id.to_string()))?;

            if let Some(handle) = job.handle.take() {
                handle.abort();
            }
            job.file_path = None;
            job.finished_at = Some(Utc::now());
            job.snapshot.status = JobStatus::Cancelled;
            job.snapshot.download_url = None;
            job.snapshot.message = "Download cancelled".to_string();
        }

        remove_dir(&self.job_dir(id)).await;
        info!("Cancelled job {}", id);
        Ok(())
    }

    /// Path and size of a completed job's file
    pub async fn file_for(&self, id: &str) -> Result<(PathBuf, u64), VidgrabError> {
        let path = {
            let jobs = self.jobs.lock().await;
            let job = jobs
                .get(id)
                .ok_or_else(|| VidgrabError::JobNotFound(id.to_string()))?;
            job.file_path
                .clone()
                .ok_or_else(|| VidgrabError::FileMissing(id.to_string()))?
        };

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok((path, meta.len())),
            _ => Err(VidgrabError::FileMissing(id.to_string())),
        }
    }

    /// Delete the job's file, its directory and its entry after `delay`
    pub async fn schedule_cleanup(&self, id: &str, delay: Duration) {
        {
            let mut jobs = self.jobs.lock().await;
            match jobs.get_mut(id) {
                Some(job) if !job.cleanup_scheduled => job.cleanup_scheduled = true,
                _ => return,
            }
        }

        let manager = self.clone();
        let id = id.to_string();
        debug!("Cleanup for job {} in {:?}", id, delay);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let removed = manager.jobs.lock().await.remove(&id);
            if let Some(path) = removed.and_then(|job| job.file_path) {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    debug!("Cleanup of {} skipped: {}", path.display(), e);
                }
            }
            // only succeeds once the directory is empty
            let _ = tokio::fs::remove_dir(manager.job_dir(&id)).await;
            info!("Cleaned up job {}", id);
        });
    }

    /// Drop finished jobs older than `max_age`; returns how many were removed
    pub async fn sweep(&self, max_age: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };

        let expired: Vec<String> = {
            let mut jobs = self.jobs.lock().await;
            let ids: Vec<String> = jobs
                .values()
                .filter(|job| job.finished_at.is_some_and(|t| t <= cutoff))
                .map(|job| job.id.clone())
                .collect();
            for id in &ids {
                jobs.remove(id);
            }
            ids
        };

        for id in &expired {
            remove_dir(&self.job_dir(id)).await;
        }
        if !expired.is_empty() {
            info!("Swept {} expired jobs", expired.len());
        }
        expired.len()
    }

    /// Run [`JobManager::sweep`] every `interval` with the configured retention
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.sweep(manager.settings.job_retention()).await;
            }
        })
    }

    /// Number of jobs currently tracked
    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Rename the download to `<title>.<ext>` unless it already carries the title
async fn rename_to_title(path: &Path, title: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    if stem.starts_with(title) {
        return path.to_path_buf();
    }

    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mp4".to_string());
    let target = path.with_file_name(format!("{}.{}", title, ext));

    match tokio::fs::rename(path, &target).await {
        Ok(()) => {
            debug!("Renamed {} -> {}", path.display(), target.display());
            target
        }
        Err(e) => {
            warn!("Could not rename {}: {}", path.display(), e);
            path.to_path_buf()
        }
    }
}

async fn remove_dir(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", dir.display(), e);
        }
    }
}
