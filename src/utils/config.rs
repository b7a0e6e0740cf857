//! Application configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Address the HTTP server binds to
    pub bind_addr: SocketAddr,

    /// Root for per-job working directories
    pub work_dir: PathBuf,

    /// Maximum concurrent downloads
    pub max_concurrent: usize,

    /// Explicit yt-dlp binary, skips discovery when set
    pub ytdlp_path: Option<PathBuf>,

    /// Pause between two strategies of the cascade (milliseconds)
    pub strategy_pause_ms: u64,

    /// Seconds a served file is kept for mobile clients
    pub cleanup_delay_mobile_secs: u64,

    /// Seconds a served file is kept for desktop clients
    pub cleanup_delay_desktop_secs: u64,

    /// Finished jobs that were never fetched are dropped after this many seconds
    pub job_retention_secs: u64,

    /// Re-encode audio to AAC 44.1kHz stereo when the track is not mobile friendly
    pub mobile_audio_fix: bool,

    /// Raw `name=value; ...` cookie header used for bilibili jobs
    pub bilibili_cookies: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            work_dir: std::env::temp_dir().join("vidgrab"),
            max_concurrent: 3,
            ytdlp_path: None,
            strategy_pause_ms: 500,
            cleanup_delay_mobile_secs: 60,
            cleanup_delay_desktop_secs: 30,
            job_retention_secs: 3600,
            mobile_audio_fix: false,
            bilibili_cookies: None,
        }
    }
}

impl AppSettings {
    /// Load settings from a JSON file; missing fields take their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let settings: AppSettings = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(settings.validate())
    }

    /// Enforce sane minimums
    pub fn validate(mut self) -> Self {
        if self.max_concurrent == 0 {
            self.max_concurrent = 1;
        }
        if self.job_retention_secs < self.cleanup_delay_mobile_secs {
            self.job_retention_secs = self.cleanup_delay_mobile_secs;
        }
        self
    }

    pub fn strategy_pause(&self) -> Duration {
        Duration::from_millis(self.strategy_pause_ms)
    }

    pub fn cleanup_delay(&self, mobile: bool) -> Duration {
        if mobile {
            Duration::from_secs(self.cleanup_delay_mobile_secs)
        } else {
            Duration::from_secs(self.cleanup_delay_desktop_secs)
        }
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }
}
