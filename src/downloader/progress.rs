//! Progress tracking for downloads
//!
//! yt-dlp is run with `--newline`, so every progress refresh arrives as its
//! own stdout line. Lines are parsed into [`ExtractorEvent`]s, a
//! [`ProgressTracker`] turns those into throttled [`ProgressUpdate`]s, and
//! the job manager folds updates into the [`ProgressSnapshot`] served by
//! `/progress`.

use regex::Regex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::LazyLock;

/// Percent band the extractor phase is mapped into; the engine owns 0-40 and 95-100
const DOWNLOAD_FLOOR: f64 = 40.0;
const DOWNLOAD_CEILING: f64 = 95.0;
/// Minimum movement before another update is emitted
const PERCENT_STEP: f64 = 5.0;

static PROGRESS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\[download\]\s+(\d+(?:\.\d+)?)%\s+of\s+~?\s*(\d+(?:\.\d+)?)\s*([KMGT]?i?B)(?:\s+at\s+(\d+(?:\.\d+)?)\s*([KMGT]?i?B)/s)?(\s+in\s)?",
    )
    .expect("valid regex")
});
static DESTINATION_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[download\] Destination: (.+)$").expect("valid regex"));
static MERGER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\[Merger\] Merging formats into "(.+)"$"#).expect("valid regex")
});
static ALREADY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[download\] (.+) has already been downloaded").expect("valid regex")
});

/// Something the extractor reported on stdout
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractorEvent {
    Downloading {
        downloaded_bytes: u64,
        total_bytes: Option<u64>,
        speed: Option<f64>,
    },
    Finished {
        filename: Option<String>,
    },
    Destination(PathBuf),
    Merging(PathBuf),
}

/// Parse one yt-dlp output line
pub fn parse_progress_line(line: &str) -> Option<ExtractorEvent> {
    let line = line.trim_end();

    if let Some(caps) = PROGRESS_LINE.captures(line) {
        let percent: f64 = caps[1].parse().ok()?;
        let total = to_bytes(caps[2].parse().ok()?, &caps[3]);

        if percent >= 100.0 && caps.get(6).is_some() {
            return Some(ExtractorEvent::Finished { filename: None });
        }

        let speed = match (caps.get(4), caps.get(5)) {
            (Some(n), Some(unit)) => n.as_str().parse().ok().map(|n| to_bytes(n, unit.as_str()) as f64),
            _ => None,
        };

        return Some(ExtractorEvent::Downloading {
            downloaded_bytes: (total as f64 * percent / 100.0) as u64,
            total_bytes: Some(total),
            speed,
        });
    }

    if let Some(caps) = DESTINATION_LINE.captures(line) {
        return Some(ExtractorEvent::Destination(PathBuf::from(&caps[1])));
    }

    if let Some(caps) = MERGER_LINE.captures(line) {
        return Some(ExtractorEvent::Merging(PathBuf::from(&caps[1])));
    }

    if let Some(caps) = ALREADY_LINE.captures(line) {
        return Some(ExtractorEvent::Finished {
            filename: Some(caps[1].to_string()),
        });
    }

    None
}

fn to_bytes(value: f64, unit: &str) -> u64 {
    let multiplier = match unit {
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TiB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "KB" => 1_000.0,
        "MB" => 1_000_000.0,
        "GB" => 1_000_000_000.0,
        "TB" => 1_000_000_000_000.0,
        _ => 1.0,
    };
    (value * multiplier) as u64
}

/// Human readable transfer speed
pub fn format_speed(bytes_per_sec: f64) -> String {
    if bytes_per_sec > 1024.0 * 1024.0 {
        format!("{:.2} MB/s", bytes_per_sec / 1024.0 / 1024.0)
    } else if bytes_per_sec > 1024.0 {
        format!("{:.2} KB/s", bytes_per_sec / 1024.0)
    } else {
        format!("{:.0} B/s", bytes_per_sec)
    }
}

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Starting,
    Downloading,
    Finished,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

/// A change to report to the job's snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub status: JobStatus,
    pub percent: f64,
    pub message: Option<String>,
    pub speed: Option<String>,
    pub downloaded_mb: Option<f64>,
    pub strategy: Option<String>,
}

impl ProgressUpdate {
    pub fn new(status: JobStatus, percent: f64) -> Self {
        Self {
            status,
            percent,
            message: None,
            speed: None,
            downloaded_mb: None,
            strategy: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }
}

/// Throttles extractor events into progress updates for one strategy attempt
#[derive(Debug, Default)]
pub struct ProgressTracker {
    last_percent: f64,
    completed: bool,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, event: &ExtractorEvent) -> Option<ProgressUpdate> {
        if self.completed {
            return None;
        }

        match event {
            ExtractorEvent::Downloading {
                downloaded_bytes,
                total_bytes: Some(total),
                speed,
            } if *total > 0 => {
                let raw = *downloaded_bytes as f64 / *total as f64 * 100.0;
                let percent = raw.clamp(DOWNLOAD_FLOOR, DOWNLOAD_CEILING);
                if (percent - self.last_percent).abs() < PERCENT_STEP {
                    return None;
                }
                self.last_percent = percent;

                Some(ProgressUpdate {
                    status: JobStatus::Downloading,
                    percent,
                    message: None,
                    speed: speed
                        .filter(|s| *s > 0.0)
                        .map(|s| format!("{:.1} MB/s", s / 1024.0 / 1024.0)),
                    downloaded_mb: Some(*downloaded_bytes as f64 / 1024.0 / 1024.0),
                    strategy: None,
                })
            }
            ExtractorEvent::Finished { .. } => {
                self.completed = true;
                Some(
                    ProgressUpdate::new(JobStatus::Finished, DOWNLOAD_CEILING)
                        .with_message("Download finished, processing file..."),
                )
            }
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }
}

/// Everything `/progress` reports about a job
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProgressSnapshot {
    pub status: JobStatus,
    pub percent: f64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloaded_mb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    pub fatal: bool,
    pub device_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

impl ProgressSnapshot {
    pub fn new(device_type: &str) -> Self {
        let mut snapshot = Self {
            device_type: device_type.to_string(),
            ..Default::default()
        };
        snapshot.message = progress_message(&snapshot);
        snapshot
    }

    /// Fold an update in; terminal states are never overwritten
    pub fn apply(&mut self, update: ProgressUpdate) {
        if self.status.is_terminal() {
            return;
        }

        self.status = update.status;
        self.percent = update.percent;
        if update.speed.is_some() {
            self.speed = update.speed;
        }
        if update.downloaded_mb.is_some() {
            self.downloaded_mb = update.downloaded_mb;
        }
        if update.strategy.is_some() {
            self.strategy = update.strategy;
        }
        self.message = update
            .message
            .unwrap_or_else(|| progress_message(self));
    }
}

/// Default user-facing message for a snapshot's status
pub fn progress_message(snapshot: &ProgressSnapshot) -> String {
    match snapshot.status {
        JobStatus::Downloading => format!(
            "Downloading... {:.1}% ({:.1} MB){}",
            snapshot.percent,
            snapshot.downloaded_mb.unwrap_or(0.0),
            snapshot
                .speed
                .as_deref()
                .map(|s| format!(" - {}", s))
                .unwrap_or_default()
        ),
        JobStatus::Finished => "Download finished, processing...".to_string(),
        JobStatus::Processing => "Processing file...".to_string(),
        JobStatus::Completed => "Download complete".to_string(),
        JobStatus::Failed => format!(
            "Download failed: {}",
            snapshot.error.as_deref().unwrap_or("unknown error")
        ),
        JobStatus::Cancelled => "Download cancelled".to_string(),
        JobStatus::Starting => "Preparing download...".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ============================================================
    // LINE PARSING
    // ============================================================

    #[test]
    fn test_parse_progress_line() {
        let event = parse_progress_line("[download]  50.0% of ~10.00MiB at  2.00MiB/s ETA 00:03").unwrap();
        match event {
            ExtractorEvent::Downloading {
                downloaded_bytes,
                total_bytes,
                speed,
            } => {
                assert_eq!(total_bytes, Some(10 * 1024 * 1024));
                assert_eq!(downloaded_bytes, 5 * 1024 * 1024);
                assert_eq!(speed, Some(2.0 * 1024.0 * 1024.0));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_parse_unknown_speed() {
        let event = parse_progress_line("[download]   1.2% of 300.50KiB at Unknown B/s ETA Unknown").unwrap();
        assert!(matches!(
            event,
            ExtractorEvent::Downloading { speed: None, .. }
        ));
    }

    #[test]
    fn test_parse_finished_line() {
        assert_eq!(
            parse_progress_line("[download] 100% of   10.00MiB in 00:00:05 at 2.00MiB/s"),
            Some(ExtractorEvent::Finished { filename: None })
        );
    }

    #[test]
    fn test_parse_destination_and_merger() {
        assert_eq!(
            parse_progress_line("[download] Destination: /tmp/job/dl_1/Video.f137.mp4"),
            Some(ExtractorEvent::Destination(PathBuf::from("/tmp/job/dl_1/Video.f137.mp4")))
        );
        assert_eq!(
            parse_progress_line(r#"[Merger] Merging formats into "/tmp/job/dl_1/Video.mp4""#),
            Some(ExtractorEvent::Merging(PathBuf::from("/tmp/job/dl_1/Video.mp4")))
        );
    }

    #[test]
    fn test_parse_already_downloaded() {
        assert_eq!(
            parse_progress_line("[download] /tmp/a.mp4 has already been downloaded"),
            Some(ExtractorEvent::Finished {
                filename: Some("/tmp/a.mp4".to_string())
            })
        );
    }

    #[test]
    fn test_parse_ignores_noise() {
        assert_eq!(parse_progress_line("[youtube] abc: Downloading webpage"), None);
        assert_eq!(parse_progress_line(""), None);
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(2.5 * 1024.0 * 1024.0), "2.50 MB/s");
        assert_eq!(format_speed(2048.0), "2.00 KB/s");
        assert_eq!(format_speed(12.0), "12 B/s");
    }

    // ============================================================
    // TRACKER
    // ============================================================

    fn downloading(done: u64, total: u64) -> ExtractorEvent {
        ExtractorEvent::Downloading {
            downloaded_bytes: done,
            total_bytes: Some(total),
            speed: Some(1024.0 * 1024.0),
        }
    }

    #[test]
    fn test_tracker_clamps_into_band() {
        let mut tracker = ProgressTracker::new();
        let first = tracker.update(&downloading(1, 100)).unwrap();
        assert_eq!(first.percent, 40.0);
        assert_eq!(first.speed.as_deref(), Some("1.0 MB/s"));

        let last = tracker.update(&downloading(100, 100)).unwrap();
        assert_eq!(last.percent, 95.0);
    }

    #[test]
    fn test_tracker_throttles_small_steps() {
        let mut tracker = ProgressTracker::new();
        assert!(tracker.update(&downloading(50, 100)).is_some());
        assert!(tracker.update(&downloading(52, 100)).is_none());
        assert!(tracker.update(&downloading(54, 100)).is_none());
        assert!(tracker.update(&downloading(55, 100)).is_some());
    }

    #[test]
    fn test_tracker_ignores_unknown_total() {
        let mut tracker = ProgressTracker::new();
        let event = ExtractorEvent::Downloading {
            downloaded_bytes: 10,
            total_bytes: None,
            speed: None,
        };
        assert!(tracker.update(&event).is_none());
    }

    #[test]
    fn test_tracker_latches_after_finish() {
        let mut tracker = ProgressTracker::new();
        let done = tracker.update(&ExtractorEvent::Finished { filename: None }).unwrap();
        assert_eq!(done.status, JobStatus::Finished);
        assert_eq!(done.percent, 95.0);
        assert!(tracker.is_completed());
        assert!(tracker.update(&downloading(100, 100)).is_none());
        assert!(tracker.update(&ExtractorEvent::Finished { filename: None }).is_none());
    }

    // ============================================================
    // SNAPSHOT
    // ============================================================

    #[test]
    fn test_snapshot_apply_and_message() {
        let mut snapshot = ProgressSnapshot::new("desktop");
        assert_eq!(snapshot.message, "Preparing download...");

        let mut tracker = ProgressTracker::new();
        snapshot.apply(tracker.update(&downloading(60, 100)).unwrap());
        assert_eq!(snapshot.status, JobStatus::Downloading);
        assert!(snapshot.message.starts_with("Downloading... 60.0%"));
        assert!(snapshot.message.ends_with("- 1.0 MB/s"));
    }

    #[test]
    fn test_snapshot_terminal_is_sticky() {
        let mut snapshot = ProgressSnapshot::new("mobile");
        snapshot.status = JobStatus::Cancelled;
        snapshot.apply(ProgressUpdate::new(JobStatus::Downloading, 50.0));
        assert_eq!(snapshot.status, JobStatus::Cancelled);
    }

    #[test]
    fn test_failed_message() {
        let snapshot = ProgressSnapshot {
            status: JobStatus::Failed,
            error: Some("boom".to_string()),
            ..Default::default()
        };
        assert_eq!(progress_message(&snapshot), "Download failed: boom");
    }

    #[test]
    fn test_snapshot_serialization_skips_empty() {
        let snapshot = ProgressSnapshot::new("desktop");
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["status"], "starting");
        assert_eq!(json["device_type"], "desktop");
        assert!(json.get("download_url").is_none());
    }
}
