//! vidgrab - video download service
//!
//! Accepts video page URLs over HTTP, downloads them with yt-dlp through a
//! cascade of format strategies, and serves the finished file back with
//! headers tuned for the requesting device.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vidgrab::server::{self, AppState};
use vidgrab::utils::platform::{check_ffmpeg, exe_name};
use vidgrab::{AppSettings, JobManager, JobStatus, YtDlpExtractor};

const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Parser)]
#[command(name = "vidgrab", version, about = "Video download service backed by yt-dlp")]
struct Args {
    /// JSON settings file; flags override its values
    #[arg(long, env = "VIDGRAB_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, env = "VIDGRAB_BIND")]
    bind: Option<SocketAddr>,

    /// Directory for per-job working directories
    #[arg(long, env = "VIDGRAB_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Maximum concurrent downloads
    #[arg(long, env = "VIDGRAB_MAX_CONCURRENT")]
    max_concurrent: Option<usize>,

    /// Path to the yt-dlp binary
    #[arg(long = "ytdlp", env = "VIDGRAB_YTDLP")]
    ytdlp: Option<PathBuf>,

    /// Re-encode incompatible audio for mobile players (needs ffmpeg)
    #[arg(long, env = "VIDGRAB_MOBILE_AUDIO_FIX")]
    mobile_audio_fix: bool,

    /// Raw cookie header used for bilibili downloads
    #[arg(long, env = "VIDGRAB_BILIBILI_COOKIES", hide_env_values = true)]
    bilibili_cookies: Option<String>,

    /// Download one URL without starting the server
    #[arg(long)]
    test_download: Option<String>,
}

impl Args {
    fn into_settings(self) -> Result<(AppSettings, Option<String>)> {
        let mut settings = match &self.config {
            Some(path) => AppSettings::from_file(path)?,
            None => AppSettings::default(),
        };

        if let Some(bind) = self.bind {
            settings.bind_addr = bind;
        }
        if let Some(dir) = self.work_dir {
            settings.work_dir = dir;
        }
        if let Some(n) = self.max_concurrent {
            settings.max_concurrent = n;
        }
        if self.ytdlp.is_some() {
            settings.ytdlp_path = self.ytdlp;
        }
        if self.mobile_audio_fix {
            settings.mobile_audio_fix = true;
        }
        if self.bilibili_cookies.is_some() {
            settings.bilibili_cookies = self.bilibili_cookies;
        }

        Ok((settings.validate(), self.test_download))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("vidgrab=info,tower_http=info")),
        )
        .init();

    let (settings, test_download) = Args::parse().into_settings()?;

    std::fs::create_dir_all(&settings.work_dir)
        .with_context(|| format!("creating work dir {}", settings.work_dir.display()))?;

    let (extractor, ytdlp_available) = match YtDlpExtractor::new(settings.ytdlp_path.as_deref()) {
        Ok(extractor) => {
            match extractor.version().await {
                Some(version) => info!("yt-dlp version {}", version),
                None => warn!("yt-dlp at {} did not report a version", extractor.ytdlp_path().display()),
            }
            (extractor, true)
        }
        Err(_) => {
            // keep serving; extraction requests will fail with a clear message
            warn!("yt-dlp not found. Install it with `pip install yt-dlp` or pass --ytdlp");
            (YtDlpExtractor::with_path(PathBuf::from(exe_name("yt-dlp"))), false)
        }
    };

    if settings.mobile_audio_fix && !check_ffmpeg().await {
        warn!("Mobile audio fix enabled but ffmpeg is unavailable; files are served as downloaded");
    }

    let bind_addr = settings.bind_addr;
    let jobs = JobManager::new(settings, Arc::new(extractor))?;

    if let Some(url) = test_download {
        return test_download_cli(&jobs, &url).await;
    }

    let _sweeper = jobs.spawn_sweeper(SWEEP_INTERVAL);
    server::serve(bind_addr, AppState::new(jobs, ytdlp_available)).await
}

/// Headless single download, printing progress until the job settles
async fn test_download_cli(jobs: &JobManager, url: &str) -> Result<()> {
    info!("Testing download: {}", url);
    let id = jobs.submit(url, false).await?;

    let mut last_percent = -1.0;
    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let Some(snapshot) = jobs.snapshot(&id).await else {
            anyhow::bail!("job {} disappeared", id);
        };

        if snapshot.percent != last_percent {
            info!("{:>5.1}% {}", snapshot.percent, snapshot.message);
            last_percent = snapshot.percent;
        }

        match snapshot.status {
            JobStatus::Completed => {
                let (path, size) = jobs.file_for(&id).await?;
                info!("Saved {} ({} bytes)", path.display(), size);
                return Ok(());
            }
            JobStatus::Failed | JobStatus::Cancelled => {
                error!("Download failed: {}", snapshot.message);
                anyhow::bail!(snapshot.error.unwrap_or(snapshot.message));
            }
            _ => {}
        }
    }
}
