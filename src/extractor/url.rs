//! URL extraction and normalization
//!
//! Users paste whatever their share button produced: a bare link, a link
//! followed by tracking parameters, or a whole share message with the link
//! somewhere inside it. Everything here turns that into the canonical page
//! URL the extractor handles best.

use crate::extractor::models::Platform;
use crate::utils::error::VidgrabError;
use regex::Regex;
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use reqwest::Client;
use serde::Serialize;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

pub const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";

const SHORT_LINK_WARNING: &str =
    "Short link could not be expanded; use the full link if the download fails";
const MAX_REDIRECT_HOPS: usize = 5;
const NONSTANDARD_WARNING: &str =
    "URL format looks non-standard; trying it as-is";

/// Query keys bilibili appends to shared links
const BILIBILI_TRACKING_PARAMS: &[&str] = &[
    "share_source",
    "vd_source",
    "share_medium",
    "share_plat",
    "timestamp",
    "bbid",
    "ts",
    "from_source",
    "from_spmid",
    "spm_id_from",
    "unique_k",
    "rt",
    "up_id",
    "seid",
    "share_from",
    "share_times",
    "plat_id",
    "bsource",
    "msource",
    "is_story_h5",
    "mid",
    "tid",
    "network",
    "platform",
    "funnel",
    "broadcast_type",
];

// Ordered from most to least specific; the first pattern with any match wins.
static URL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)https?://b23\.tv/[a-zA-Z0-9]+(?:\?[^\s]*)?",
        r"(?i)https?://(?:www\.|m\.)?bilibili\.com/video/[a-zA-Z0-9]+/?(?:\?[^\s]*)?",
        r"(?i)https?://(?:www\.|m\.)?youtube\.com/watch\?v=[a-zA-Z0-9_-]+(?:&[^\s]*)?",
        r"(?i)https?://youtu\.be/[a-zA-Z0-9_-]+(?:\?[^\s]*)?",
        r"(?i)https?://(?:www\.|v\.)?douyin\.com/[^\s]+",
        r"(?i)https?://(?:www\.)?tiktok\.com/[^\s]+",
        r"(?i)https?://[^\s\x{4e00}-\x{9fff}]+",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

static BV_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^A-Za-z0-9])(BV[A-Za-z0-9]{10,12})").expect("valid regex"));
static AV_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:/video/av|[?&]aid=)(\d+)").expect("valid regex")
});
static YOUTUBE_ID: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"youtube\.com/watch\?(?:[^#\s]*&)?v=([a-zA-Z0-9_-]{11})",
        r"youtu\.be/([a-zA-Z0-9_-]{11})",
        r"youtube\.com/(?:embed|shorts)/([a-zA-Z0-9_-]{11})",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

/// A URL ready to hand to the extractor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedUrl {
    pub url: String,
    pub original: String,
    pub platform: Platform,
    pub video_id: Option<String>,
    pub warning: Option<String>,
}

/// Pull the first usable URL out of free text
pub fn extract_url(text: &str) -> Option<String> {
    for pattern in URL_PATTERNS.iter() {
        let longest = pattern
            .find_iter(text)
            .map(|m| m.as_str())
            .max_by_key(|m| m.len());
        if let Some(found) = longest {
            return Some(found.to_string());
        }
    }
    None
}

pub fn detect_platform(url: &str) -> Platform {
    let lower = url.to_lowercase();
    if lower.contains("bilibili.com") || lower.contains("b23.tv") {
        Platform::Bilibili
    } else if lower.contains("youtube.com") || lower.contains("youtu.be") {
        Platform::YouTube
    } else if lower.contains("douyin.com") || lower.contains("tiktok.com") {
        Platform::Douyin
    } else {
        Platform::Unknown
    }
}

/// Drop bilibili share-tracking query keys, keeping everything else in order
pub fn strip_tracking_params(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    if parsed.query().is_none() {
        return url.to_string();
    }

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !BILIBILI_TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(kept);
    }
    parsed.to_string()
}

/// `BV...` or `av<digits>` id of a bilibili video
pub fn bilibili_video_id(url: &str) -> Option<String> {
    if let Some(caps) = BV_ID.captures(url) {
        return Some(caps[1].to_string());
    }
    AV_ID.captures(url).map(|caps| format!("av{}", &caps[1]))
}

pub fn youtube_video_id(url: &str) -> Option<String> {
    YOUTUBE_ID
        .iter()
        .find_map(|re| re.captures(url))
        .map(|caps| caps[1].to_string())
}

/// Rewrite mobile and bare bilibili hosts to the desktop host
fn desktop_bilibili(url: &str) -> String {
    url.replace("m.bilibili.com", "www.bilibili.com")
        .replace("//bilibili.com", "//www.bilibili.com")
}

/// Normalize user input without touching the network
pub fn normalize(input: &str) -> Result<NormalizedUrl, VidgrabError> {
    let original = input.trim();
    if original.is_empty() {
        return Err(VidgrabError::InvalidUrl("empty URL".to_string()));
    }

    let extracted = extract_url(original).unwrap_or_else(|| original.to_string());
    if extracted != original {
        debug!("Extracted URL: {} -> {}", original, extracted);
    }

    match Url::parse(&extracted) {
        Ok(u) if matches!(u.scheme(), "http" | "https") && u.host_str().is_some() => {}
        _ => return Err(VidgrabError::InvalidUrl(original.to_string())),
    }

    let url = desktop_bilibili(&extracted);
    let platform = detect_platform(&url);

    let normalized = match platform {
        Platform::Bilibili => normalize_bilibili(original, &url),
        Platform::YouTube => {
            let video_id = youtube_video_id(&url);
            NormalizedUrl {
                url: video_id
                    .as_ref()
                    .map(|id| format!("https://www.youtube.com/watch?v={}", id))
                    .unwrap_or_else(|| url.clone()),
                original: original.to_string(),
                platform,
                video_id,
                warning: None,
            }
        }
        Platform::Douyin | Platform::Unknown => NormalizedUrl {
            url,
            original: original.to_string(),
            platform,
            video_id: None,
            warning: None,
        },
    };

    Ok(normalized)
}

fn normalize_bilibili(original: &str, url: &str) -> NormalizedUrl {
    let cleaned = if url.contains("bilibili.com") {
        strip_tracking_params(url)
    } else {
        url.to_string()
    };

    if let Some(id) = bilibili_video_id(&cleaned) {
        // multi-part videos select the part with `p`
        let part = Url::parse(&cleaned).ok().and_then(|u| {
            u.query_pairs()
                .find(|(k, _)| k == "p")
                .map(|(_, v)| v.into_owned())
        });
        let canonical = match part {
            Some(p) if p != "1" => format!("https://www.bilibili.com/video/{}?p={}", id, p),
            _ => format!("https://www.bilibili.com/video/{}", id),
        };
        return NormalizedUrl {
            url: canonical,
            original: original.to_string(),
            platform: Platform::Bilibili,
            video_id: Some(id),
            warning: None,
        };
    }

    let warning = if cleaned.contains("b23.tv") {
        Some(SHORT_LINK_WARNING.to_string())
    } else if cleaned.contains("/video/") {
        None
    } else {
        Some(NONSTANDARD_WARNING.to_string())
    };

    NormalizedUrl {
        url: cleaned,
        original: original.to_string(),
        platform: Platform::Bilibili,
        video_id: None,
        warning,
    }
}

/// Expands b23.tv short links by reading their redirects
#[derive(Clone)]
pub struct ShortLinkResolver {
    client: Client,
    attempts: usize,
    retry_delay: Duration,
}

impl ShortLinkResolver {
    pub fn new() -> Result<Self, VidgrabError> {
        let client = Client::builder()
            .user_agent(MOBILE_USER_AGENT)
            .redirect(Policy::none())
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            client,
            attempts: 3,
            retry_delay: Duration::from_secs(1),
        })
    }

    pub fn with_retry(mut self, attempts: usize, retry_delay: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    /// Normalize `input`, expanding it first when it is a short link
    pub async fn resolve(&self, input: &str) -> Result<NormalizedUrl, VidgrabError> {
        let normalized = normalize(input)?;
        if !normalized.url.contains("b23.tv") {
            return Ok(normalized);
        }

        let short = normalized.url.clone();
        info!("Expanding short link: {}", short);

        for attempt in 1..=self.attempts {
            match self.expand(&short).await {
                Ok(Some(expanded)) => {
                    info!("Short link expanded (attempt {}): {} -> {}", attempt, short, expanded);
                    let mut resolved = normalize(&expanded)?;
                    resolved.original = normalized.original.clone();
                    return Ok(resolved);
                }
                Ok(None) => debug!("Short link did not redirect (attempt {})", attempt),
                Err(e) => warn!("Short link expansion attempt {} failed: {}", attempt, e),
            }
            if attempt < self.attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        warn!("Giving up on short link, using it as-is: {}", short);
        Ok(NormalizedUrl {
            warning: Some(SHORT_LINK_WARNING.to_string()),
            ..normalized
        })
    }

    /// Walk `Location` headers until they leave the short link host
    async fn expand(&self, short: &str) -> Result<Option<String>, VidgrabError> {
        let mut current = short.to_string();
        for _ in 0..MAX_REDIRECT_HOPS {
            match self.location(&current).await? {
                Some(next) if next.contains("b23.tv") => current = next,
                Some(next) => return Ok(Some(next)),
                None => break,
            }
        }
        Ok((current != short).then_some(current))
    }

    /// Absolute redirect target of `url`, if it answers with one
    async fn location(&self, url: &str) -> Result<Option<String>, VidgrabError> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_redirection() {
            return Ok(None);
        }
        let Some(location) = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
        else {
            return Ok(None);
        };
        let target = response
            .url()
            .join(location)
            .map_err(|e| VidgrabError::InvalidUrl(format!("{}: {}", location, e)))?;
        Ok(Some(target.to_string()))
    }
}
