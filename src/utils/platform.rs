//! Locating the external tools vidgrab drives
//!
//! yt-dlp does the extraction and ffmpeg/ffprobe handle the optional audio
//! fix. Lookup order for every tool:
//! 1. An explicitly configured path
//! 2. Next to the running executable
//! 3. System PATH
//! 4. Common installation paths

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

const COMMON_DIRS: &[&str] = &[
    "/opt/homebrew/bin",
    "/usr/local/bin",
    "/usr/bin",
    "~/.local/bin",
];

/// Platform-specific executable name
pub fn exe_name(tool: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{}.exe", tool)
    } else {
        tool.to_string()
    }
}

/// Find a tool binary
pub fn find_tool(tool: &str, explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Some(path.to_path_buf());
        }
        warn!("Configured {} path does not exist: {}", tool, path.display());
    }

    let binary = exe_name(tool);

    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
    {
        let adjacent = exe_dir.join(&binary);
        if adjacent.exists() && is_executable(&adjacent) {
            debug!("Using {} next to executable: {:?}", tool, adjacent);
            return Some(adjacent);
        }
    }

    if let Ok(path) = which::which(&binary) {
        return Some(path);
    }

    for dir in COMMON_DIRS {
        let dir = if let Some(rest) = dir.strip_prefix("~/") {
            match dirs::home_dir() {
                Some(home) => home.join(rest),
                None => continue,
            }
        } else {
            PathBuf::from(dir)
        };
        let candidate = dir.join(&binary);
        if candidate.exists() && is_executable(&candidate) {
            return Some(candidate);
        }
    }

    None
}

/// Check whether ffmpeg can be run
pub async fn check_ffmpeg() -> bool {
    let Some(ffmpeg) = find_tool("ffmpeg", None) else {
        warn!("ffmpeg not found; audio fixes and merges are unavailable");
        return false;
    };

    let probe = Command::new(&ffmpeg)
        .arg("-version")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(Duration::from_secs(5), probe).await {
        Ok(Ok(output)) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout);
            info!(
                "ffmpeg available: {}",
                version.lines().next().unwrap_or_default()
            );
            true
        }
        Ok(Ok(_)) | Ok(Err(_)) => {
            warn!("ffmpeg at {} failed to run", ffmpeg.display());
            false
        }
        Err(_) => {
            warn!("ffmpeg version check timed out");
            false
        }
    }
}

/// Check if a file is executable
fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        std::fs::metadata(path)
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    {
        path.exists()
    }
}
