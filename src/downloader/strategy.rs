//! The format-selector cascades tried for each platform

use crate::extractor::models::Platform;
use std::time::Duration;

pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const ANDROID_UA: &str = "Mozilla/5.0 (Linux; Android 13; SM-G991B) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36";
const PIXEL_UA: &str = "Mozilla/5.0 (Linux; Android 13; Pixel 7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36";
const IPAD_UA: &str = "Mozilla/5.0 (iPad; CPU OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
const MAC_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub const BILIBILI_REFERER: &str = "https://www.bilibili.com/";

/// One attempt of the cascade: a format selector plus the request shape used with it
#[derive(Debug, Clone, PartialEq)]
pub struct Strategy {
    pub name: &'static str,
    pub format: &'static str,
    pub http_headers: Vec<(&'static str, &'static str)>,
    pub socket_timeout: Duration,
    pub retries: u32,
    pub fragment_retries: u32,
    pub ignore_errors: bool,
}

impl Strategy {
    fn new(name: &'static str, format: &'static str, timeout_secs: u64, retries: u32) -> Self {
        Self {
            name,
            format,
            http_headers: Vec::new(),
            socket_timeout: Duration::from_secs(timeout_secs),
            retries,
            fragment_retries: 5,
            ignore_errors: true,
        }
    }

    fn header(mut self, name: &'static str, value: &'static str) -> Self {
        self.http_headers.push((name, value));
        self
    }

    fn fragment_retries(mut self, n: u32) -> Self {
        self.fragment_retries = n;
        self
    }

    fn strict(mut self) -> Self {
        self.ignore_errors = false;
        self
    }

    /// Ordered attempts for a platform, best quality first
    pub fn cascade(platform: Platform) -> Vec<Strategy> {
        match platform {
            Platform::Bilibili => vec![
                Strategy::new(
                    "bilibili best quality (1080p)",
                    "bestvideo[height<=1080]+bestaudio[acodec!=none]/best[height<=1080][acodec!=none]/best",
                    45,
                    2,
                )
                .fragment_retries(3)
                .header("User-Agent", DESKTOP_USER_AGENT)
                .header("Referer", BILIBILI_REFERER)
                .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
                .header("Accept-Language", "zh-CN,zh;q=0.9,en;q=0.8"),
                Strategy::new(
                    "bilibili mobile compatible (720p)",
                    "best[height<=720][acodec!=none]+bestaudio/best[height<=720]/best",
                    30,
                    2,
                )
                .header("User-Agent", ANDROID_UA)
                .header("Referer", BILIBILI_REFERER)
                .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
                .header("Accept-Language", "zh-CN,zh;q=0.9"),
                Strategy::new(
                    "bilibili stream id pairs",
                    "30077+30280/30066+30280/100048+30280/100047+30232/30011+30216",
                    30,
                    1,
                )
                .header("User-Agent", IPAD_UA)
                .header("Referer", BILIBILI_REFERER),
                Strategy::new(
                    "bilibili generic (480p)",
                    "best[height<=480]+bestaudio/best[acodec!=none]/best",
                    20,
                    1,
                )
                .header("User-Agent", MAC_UA)
                .header("Referer", BILIBILI_REFERER),
                Strategy::new("bilibili last resort", "best/worst", 15, 1),
            ],
            Platform::YouTube | Platform::Douyin | Platform::Unknown => vec![
                Strategy::new(
                    "best quality (1080p)",
                    "bestvideo[height<=1080]+bestaudio/best[height<=1080][acodec!=none]/best",
                    45,
                    2,
                )
                .strict()
                .header("User-Agent", DESKTOP_USER_AGENT),
                Strategy::new(
                    "mobile (720p)",
                    "best[height<=720][acodec!=none]/best[ext=mp4]/best",
                    30,
                    1,
                )
                .header("User-Agent", PIXEL_UA),
                Strategy::new("generic", "best[acodec!=none]/best", 20, 1),
            ],
        }
    }

    /// yt-dlp flags for this strategy
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            self.format.to_string(),
            "--merge-output-format".to_string(),
            "mp4".to_string(),
            "--geo-bypass".to_string(),
            "--no-check-certificates".to_string(),
            "--windows-filenames".to_string(),
            "--socket-timeout".to_string(),
            self.socket_timeout.as_secs().to_string(),
            "--retries".to_string(),
            self.retries.to_string(),
            "--fragment-retries".to_string(),
            self.fragment_retries.to_string(),
        ];

        for (name, value) in &self.http_headers {
            args.push("--add-header".to_string());
            args.push(format!("{}:{}", name, value));
        }

        if self.ignore_errors {
            args.push("--ignore-errors".to_string());
        }

        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bilibili_cascade_order() {
        let cascade = Strategy::cascade(Platform::Bilibili);
        assert_eq!(cascade.len(), 5);
        assert!(cascade[0].format.starts_with("bestvideo[height<=1080]"));
        assert_eq!(cascade[4].format, "best/worst");
        assert!(cascade[0].socket_timeout > cascade[4].socket_timeout);
    }

    #[test]
    fn test_bilibili_requests_carry_referer() {
        for strategy in Strategy::cascade(Platform::Bilibili)
            .iter()
            .filter(|s| !s.http_headers.is_empty())
        {
            assert!(
                strategy
                    .http_headers
                    .contains(&("Referer", BILIBILI_REFERER)),
                "{} lacks the referer",
                strategy.name
            );
        }
    }

    #[test]
    fn test_other_platforms_share_cascade() {
        let yt = Strategy::cascade(Platform::YouTube);
        assert_eq!(yt.len(), 3);
        assert_eq!(yt, Strategy::cascade(Platform::Unknown));
        assert!(!yt[0].ignore_errors);
        assert!(yt[1].ignore_errors);
    }

    #[test]
    fn test_to_args() {
        let strategy = &Strategy::cascade(Platform::Bilibili)[2];
        let args = strategy.to_args();

        let f = args.iter().position(|a| a == "-f").unwrap();
        assert_eq!(args[f + 1], strategy.format);
        assert!(args.contains(&"--ignore-errors".to_string()));
        assert!(args.contains(&format!("Referer:{}", BILIBILI_REFERER)));

        let timeout = args.iter().position(|a| a == "--socket-timeout").unwrap();
        assert_eq!(args[timeout + 1], "30");
    }
}
