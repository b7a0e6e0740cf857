//! Shared fixtures: an in-process extractor that never touches the network

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use vidgrab::downloader::progress::ExtractorEvent;
use vidgrab::server::AppState;
use vidgrab::{AppSettings, ExtractJob, Extractor, JobManager, VideoInfo, VidgrabError};

/// Writes `file_size` bytes named after the title, after failing `failures` first
pub struct FakeExtractor {
    pub title: String,
    pub file_size: usize,
    pub delay: Duration,
    pub probe_error: Option<String>,
    failures: Mutex<Vec<String>>,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub strategies_seen: Mutex<Vec<String>>,
}

impl FakeExtractor {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            file_size: 64 * 1024,
            delay: Duration::ZERO,
            probe_error: None,
            failures: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            strategies_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_file_size(mut self, size: usize) -> Self {
        self.file_size = size;
        self
    }

    pub fn with_probe_error(mut self, message: &str) -> Self {
        self.probe_error = Some(message.to_string());
        self
    }

    /// Queue errors returned by the next download calls, in order
    pub fn failing_with(self, messages: &[&str]) -> Self {
        *self.failures.lock().unwrap() = messages.iter().rev().map(|m| m.to_string()).collect();
        self
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    fn id(&self) -> &'static str {
        "fake"
    }

    async fn probe(&self, url: &str) -> Result<VideoInfo, VidgrabError> {
        if let Some(message) = &self.probe_error {
            return Err(VidgrabError::ExtractionError(message.clone()));
        }
        Ok(VideoInfo {
            id: "fake1".to_string(),
            title: self.title.clone(),
            webpage_url: url.to_string(),
            duration: Some(90),
            uploader: Some("uploader".to_string()),
            ..Default::default()
        })
    }

    async fn download(
        &self,
        job: &ExtractJob,
        events: mpsc::Sender<ExtractorEvent>,
    ) -> Result<(), VidgrabError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.strategies_seen
            .lock()
            .unwrap()
            .push(job.strategy.name.to_string());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        // cancelled jobs drop this future mid-flight
        let _slot = InFlight(&self.in_flight);
        self.run(job, events).await
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeExtractor {
    async fn run(
        &self,
        job: &ExtractJob,
        events: mpsc::Sender<ExtractorEvent>,
    ) -> Result<(), VidgrabError> {
        tokio::time::sleep(self.delay).await;

        let failure = self.failures.lock().unwrap().pop();
        if let Some(message) = failure {
            return Err(VidgrabError::ExtractionError(message));
        }

        let total = self.file_size as u64;
        for done in [total / 4, total / 2, total] {
            let _ = events
                .send(ExtractorEvent::Downloading {
                    downloaded_bytes: done,
                    total_bytes: Some(total),
                    speed: Some(2.0 * 1024.0 * 1024.0),
                })
                .await;
        }

        let dir = job.output_template.parent().expect("template has a parent");
        let path = dir.join(format!("{}.mp4", self.title));
        tokio::fs::write(&path, vec![7u8; self.file_size]).await?;
        let _ = events
            .send(ExtractorEvent::Finished {
                filename: Some(path.to_string_lossy().into_owned()),
            })
            .await;
        Ok(())
    }
}

pub fn settings(temp: &TempDir, max_concurrent: usize) -> AppSettings {
    AppSettings {
        work_dir: temp.path().to_path_buf(),
        max_concurrent,
        strategy_pause_ms: 0,
        cleanup_delay_desktop_secs: 0,
        cleanup_delay_mobile_secs: 0,
        ..Default::default()
    }
}

pub fn job_manager(temp: &TempDir, extractor: Arc<FakeExtractor>, max_concurrent: usize) -> JobManager {
    JobManager::new(settings(temp, max_concurrent), extractor).expect("job manager")
}

pub fn app_state(temp: &TempDir, extractor: Arc<FakeExtractor>) -> AppState {
    AppState::new(job_manager(temp, extractor, 2), true)
}

/// Poll until the job reaches a terminal state
pub async fn wait_until_done(jobs: &JobManager, id: &str) -> vidgrab::ProgressSnapshot {
    for _ in 0..500 {
        if let Some(snapshot) = jobs.snapshot(id).await {
            if snapshot.status.is_terminal() {
                return snapshot;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} did not finish in time", id);
}
