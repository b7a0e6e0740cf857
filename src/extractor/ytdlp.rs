//! yt-dlp wrapper for video extraction
//!
//! Metadata comes from `yt-dlp --dump-json`; downloads run yt-dlp with
//! `--newline` and parse its stdout line by line. The child is spawned with
//! `kill_on_drop`, so aborting the job task also stops the process.

use crate::downloader::progress::{parse_progress_line, ExtractorEvent};
use crate::downloader::strategy::{BILIBILI_REFERER, DESKTOP_USER_AGENT};
use crate::extractor::models::VideoInfo;
use crate::extractor::traits::{ExtractJob, Extractor};
use crate::utils::error::VidgrabError;
use crate::utils::platform::find_tool;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Hard ceiling for one download attempt
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(1800);
const PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// Extractor backed by the yt-dlp binary
pub struct YtDlpExtractor {
    ytdlp_path: PathBuf,
}

impl YtDlpExtractor {
    /// Locate yt-dlp, preferring an explicitly configured path
    pub fn new(explicit: Option<&Path>) -> Result<Self, VidgrabError> {
        match find_tool("yt-dlp", explicit) {
            Some(path) => {
                info!("Found yt-dlp at: {}", path.display());
                Ok(Self { ytdlp_path: path })
            }
            None => {
                error!("yt-dlp not found anywhere!");
                Err(VidgrabError::YtDlpNotFound)
            }
        }
    }

    /// Use a specific binary without searching
    pub fn with_path(ytdlp_path: PathBuf) -> Self {
        Self { ytdlp_path }
    }

    pub fn ytdlp_path(&self) -> &Path {
        &self.ytdlp_path
    }

    /// `yt-dlp --version`, if it runs at all
    pub async fn version(&self) -> Option<String> {
        let output = Command::new(&self.ytdlp_path)
            .arg("--version")
            .output()
            .await
            .ok()?;
        output
            .status
            .success()
            .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn download_args(job: &ExtractJob) -> Vec<String> {
        let mut args = vec![
            "--newline".to_string(),
            "--no-warnings".to_string(),
            "--no-playlist".to_string(),
            "-o".to_string(),
            job.output_template.to_string_lossy().into_owned(),
        ];
        args.extend(job.strategy.to_args());
        if let Some(cookies) = &job.cookie_file {
            args.push("--cookies".to_string());
            args.push(cookies.to_string_lossy().into_owned());
        }
        args.push(job.url.clone());
        args
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    fn id(&self) -> &'static str {
        "yt-dlp"
    }

    async fn probe(&self, url: &str) -> Result<VideoInfo, VidgrabError> {
        debug!("Extracting video info for URL: {}", url);

        let output = Command::new(&self.ytdlp_path)
            .args(probe_args(url))
            .kill_on_drop(true)
            .output();

        let output = timeout(PROBE_TIMEOUT, output)
            .await
            .map_err(|_| VidgrabError::ExtractionError("metadata request timed out".to_string()))??;

        if !output.status.success() {
            let error_msg = String::from_utf8_lossy(&output.stderr);
            warn!("yt-dlp info extraction failed: {}", error_msg.trim());
            return Err(VidgrabError::ExtractionError(error_msg.trim().to_string()));
        }

        let info: VideoInfo = serde_json::from_slice(&output.stdout)?;
        Ok(info)
    }

    async fn download(
        &self,
        job: &ExtractJob,
        events: mpsc::Sender<ExtractorEvent>,
    ) -> Result<(), VidgrabError> {
        let args = Self::download_args(job);
        debug!("Running yt-dlp with strategy '{}'", job.strategy.name);

        let mut child = Command::new(&self.ytdlp_path)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VidgrabError::OperationFailed("yt-dlp stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| VidgrabError::OperationFailed("yt-dlp stderr not captured".to_string()))?;

        let read_stdout = async {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(event) = parse_progress_line(&line) {
                    // receiver gone means nobody is watching; keep draining
                    let _ = events.send(event).await;
                }
            }
        };

        let read_stderr = async {
            let mut collected = Vec::new();
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("yt-dlp: {}", line);
                collected.push(line);
            }
            collected
        };

        let run = async {
            let ((), stderr_lines) = futures::future::join(read_stdout, read_stderr).await;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, stderr_lines))
        };

        let (status, stderr_lines) = match timeout(DOWNLOAD_TIMEOUT, run).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(VidgrabError::ExtractionError(format!(
                    "yt-dlp timed out after {} seconds",
                    DOWNLOAD_TIMEOUT.as_secs()
                )))
            }
        };

        if status.success() {
            return Ok(());
        }

        let message = failure_message(&stderr_lines)
            .unwrap_or_else(|| format!("yt-dlp exited with {}", status));
        warn!("Strategy '{}' failed: {}", job.strategy.name, message);
        Err(VidgrabError::ExtractionError(message))
    }
}

fn probe_args(url: &str) -> Vec<String> {
    let mut args: Vec<String> = [
        "--dump-json",
        "--no-download",
        "--no-warnings",
        "--no-playlist",
        "--socket-timeout",
        "30",
        "--geo-bypass",
        "--add-header",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(format!("User-Agent:{}", DESKTOP_USER_AGENT));
    if url.contains("bilibili.com") || url.contains("b23.tv") {
        args.push("--add-header".to_string());
        args.push(format!("Referer:{}", BILIBILI_REFERER));
    }
    args.push(url.to_string());
    args
}

/// The `ERROR:` lines yt-dlp printed, or its last words when there are none
fn failure_message(stderr_lines: &[String]) -> Option<String> {
    let errors: Vec<&str> = stderr_lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| l.starts_with("ERROR:"))
        .collect();

    if !errors.is_empty() {
        return Some(errors.join("\n"));
    }

    let tail: Vec<&str> = stderr_lines
        .iter()
        .rev()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .take(3)
        .collect();

    (!tail.is_empty()).then(|| tail.into_iter().rev().collect::<Vec<_>>().join("\n"))
}
