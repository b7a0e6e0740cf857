//! Audio compatibility fix for mobile players
//!
//! Some sources ship Opus/FLAC tracks or high sample rates that iOS and many
//! Android players refuse. When enabled, the finished file's first audio
//! stream is probed and, if needed, re-encoded to AAC 44.1 kHz stereo while
//! the video stream is copied untouched.

use crate::utils::error::VidgrabError;
use crate::utils::platform::find_tool;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const FFMPEG_TIMEOUT: Duration = Duration::from_secs(120);
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);
/// A re-encode smaller than this is treated as broken
const MIN_FIXED_BYTES: u64 = 1024 * 1024;

const MOBILE_CODECS: &[&str] = &["aac", "mp3"];
const MAX_SAMPLE_RATE: u32 = 48_000;
const MAX_CHANNELS: u32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct AudioStream {
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u32,
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    codec_name: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u32>,
}

/// Parse `ffprobe -print_format json -show_streams` output
fn parse_probe(json: &[u8]) -> Option<AudioStream> {
    let output: ProbeOutput = serde_json::from_slice(json).ok()?;
    let stream = output.streams.into_iter().next()?;
    Some(AudioStream {
        codec: stream.codec_name.unwrap_or_default().to_lowercase(),
        sample_rate: stream
            .sample_rate
            .and_then(|r| r.parse().ok())
            .unwrap_or(0),
        channels: stream.channels.unwrap_or(0),
    })
}

/// First audio stream of `path`, if ffprobe can read one
pub async fn probe_audio(path: &Path) -> Option<AudioStream> {
    let ffprobe = find_tool("ffprobe", None)?;

    let output = Command::new(ffprobe)
        .args(["-v", "quiet", "-print_format", "json", "-show_streams", "-select_streams", "a:0"])
        .arg(path)
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();

    match timeout(PROBE_TIMEOUT, output).await {
        Ok(Ok(out)) if out.status.success() => parse_probe(&out.stdout),
        _ => {
            debug!("ffprobe could not read {}", path.display());
            None
        }
    }
}

pub fn needs_fix(stream: &AudioStream) -> bool {
    !MOBILE_CODECS.contains(&stream.codec.as_str())
        || stream.sample_rate > MAX_SAMPLE_RATE
        || stream.channels > MAX_CHANNELS
}

/// `<stem>_mobile_fixed.mp4` next to the input
pub fn fixed_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    path.with_file_name(format!("{}_mobile_fixed.mp4", stem))
}

/// Re-encode the audio track; on success the result takes the original's place
pub async fn fix_audio(path: &Path) -> Result<PathBuf, VidgrabError> {
    let ffmpeg = find_tool("ffmpeg", None)
        .ok_or_else(|| VidgrabError::OperationFailed("ffmpeg not found".to_string()))?;
    let output_path = fixed_path(path);

    let run = Command::new(ffmpeg)
        .arg("-i")
        .arg(path)
        .args([
            "-c:v", "copy", "-c:a", "aac", "-b:a", "128k", "-ar", "44100", "-ac", "2",
            "-movflags", "+faststart", "-avoid_negative_ts", "make_zero", "-y",
        ])
        .arg(&output_path)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = match timeout(FFMPEG_TIMEOUT, run).await {
        Ok(result) => result?,
        Err(_) => {
            let _ = tokio::fs::remove_file(&output_path).await;
            return Err(VidgrabError::OperationFailed("ffmpeg timed out".to_string()));
        }
    };

    if !output.status.success() {
        let _ = tokio::fs::remove_file(&output_path).await;
        let stderr = String::from_utf8_lossy(&output.stderr);
        let last = stderr.lines().last().unwrap_or_default().to_string();
        return Err(VidgrabError::OperationFailed(format!("ffmpeg failed: {}", last)));
    }

    let size = tokio::fs::metadata(&output_path).await.map(|m| m.len()).unwrap_or(0);
    if size <= MIN_FIXED_BYTES {
        let _ = tokio::fs::remove_file(&output_path).await;
        return Err(VidgrabError::OperationFailed(format!(
            "ffmpeg output too small ({} bytes)",
            size
        )));
    }

    replace_original(path, &output_path).await
}

/// Swap `fixed` in for `original`, keeping the original stem with an `.mp4` extension
async fn replace_original(original: &Path, fixed: &Path) -> Result<PathBuf, VidgrabError> {
    tokio::fs::remove_file(original).await?;
    let target = original.with_extension("mp4");
    tokio::fs::rename(fixed, &target).await?;
    debug!("Replaced {} with re-encoded audio", target.display());
    Ok(target)
}

/// Apply the audio fix when it is needed; any failure keeps the original
pub async fn fix_for_mobile(path: &Path) -> PathBuf {
    let Some(stream) = probe_audio(path).await else {
        return path.to_path_buf();
    };

    if !needs_fix(&stream) {
        debug!("Audio already mobile friendly: {:?}", stream);
        return path.to_path_buf();
    }

    info!(
        "Re-encoding audio ({} {} Hz, {} ch) for {}",
        stream.codec,
        stream.sample_rate,
        stream.channels,
        path.display()
    );
    match fix_audio(path).await {
        Ok(fixed) => fixed,
        Err(e) => {
            warn!("Audio fix failed, keeping original: {}", e);
            path.to_path_buf()
        }
    }
}
