//! User-Agent sniffing and per-device download headers
//!
//! Mobile browsers disagree about how a video response should look: iOS
//! Safari and the WeChat webview only save files they can play inline, while
//! most Android browsers want a plain attachment.

use crate::utils::config::AppSettings;
use axum::http::{header, HeaderMap, HeaderValue};
use std::path::Path;
use std::time::Duration;

const MOBILE_KEYWORDS: &[&str] = &["mobile", "android", "iphone", "ipad", "ipod"];
const IOS_KEYWORDS: &[&str] = &["iphone", "ipad", "ipod"];
/// Wider net used when a download is submitted
const MOBILE_REQUEST_KEYWORDS: &[&str] = &[
    "mobile", "android", "iphone", "ipad", "ipod", "phone", "tablet", "touch", "mini",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceProfile {
    pub mobile: bool,
    pub ios: bool,
    pub android: bool,
    pub safari: bool,
    pub chrome: bool,
    pub wechat: bool,
}

impl DeviceProfile {
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.to_lowercase();
        let has = |keywords: &[&str]| keywords.iter().any(|k| ua.contains(k));

        Self {
            mobile: has(MOBILE_KEYWORDS),
            ios: has(IOS_KEYWORDS),
            android: ua.contains("android"),
            safari: ua.contains("safari") && !ua.contains("chrome"),
            chrome: ua.contains("chrome"),
            wechat: ua.contains("micromessenger"),
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self::from_user_agent(user_agent(headers))
    }

    pub fn device_type(&self) -> &'static str {
        if self.mobile {
            "mobile"
        } else {
            "desktop"
        }
    }

    pub fn cleanup_delay(&self, settings: &AppSettings) -> Duration {
        settings.cleanup_delay(self.mobile)
    }

    /// Response headers for serving `filename` of `size` bytes to this device
    pub fn file_headers(&self, filename: &str, size: u64) -> HeaderMap {
        let ascii = ascii_fallback(filename);
        let encoded = urlencoding::encode(filename);
        let mut headers = HeaderMap::new();

        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

        if !self.mobile {
            let disposition = if ascii == filename {
                format!("attachment; filename=\"{}\"", ascii)
            } else {
                format!("attachment; filename=\"{}\"; filename*=UTF-8''{}", ascii, encoded)
            };
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(video_mime(filename)));
            headers.insert(header::CONTENT_DISPOSITION, header_value(&disposition));
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("public, max-age=0"));
            return headers;
        }

        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        );
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(header::EXPIRES, HeaderValue::from_static("0"));

        let (content_type, disposition) = if self.ios || self.wechat {
            ("video/mp4", format!("inline; filename=\"{}\"", ascii))
        } else if self.android && self.chrome {
            ("application/octet-stream", format!("attachment; filename=\"{}\"", ascii))
        } else {
            (
                "application/octet-stream",
                format!("attachment; filename=\"{}\"; filename*=UTF-8''{}", ascii, encoded),
            )
        };
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        headers.insert(header::CONTENT_DISPOSITION, header_value(&disposition));
        headers
    }
}

/// Mobile check used by `/download`
pub fn is_mobile_request(user_agent: &str) -> bool {
    let ua = user_agent.to_lowercase();
    MOBILE_REQUEST_KEYWORDS.iter().any(|k| ua.contains(k))
}

pub fn user_agent(headers: &HeaderMap) -> &str {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

fn header_value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

fn video_mime(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "flv" => "video/x-flv",
        "avi" => "video/x-msvideo",
        _ => "video/mp4",
    }
}

/// Quoted `filename=` value that is safe in a header: ASCII only, no quotes
fn ascii_fallback(filename: &str) -> String {
    let unsafe_char = |c: char| c == '"' || c == '\\' || c.is_ascii_control();
    if filename.is_ascii() && !filename.contains(unsafe_char) {
        return filename.to_string();
    }

    let path = Path::new(filename);
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| e.is_ascii())
        .unwrap_or("mp4");
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();

    let mut safe = String::with_capacity(stem.len());
    for c in stem.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ' | '(' | ')' | '[' | ']') {
            safe.push(c);
        } else if !safe.ends_with('_') {
            safe.push('_');
        }
    }

    let safe = safe.trim_matches(|c| c == '_' || c == ' ');
    if safe.is_empty() {
        format!("video.{}", ext)
    } else {
        format!("{}.{}", safe, ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
    const ANDROID_CHROME: &str = "Mozilla/5.0 (Linux; Android 13; Pixel 7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36";
    const ANDROID_FIREFOX: &str = "Mozilla/5.0 (Android 13; Mobile; rv:120.0) Gecko/120.0 Firefox/120.0";
    const WECHAT: &str = "Mozilla/5.0 (Linux; Android 13; V2055A) AppleWebKit/537.36 (KHTML, like Gecko) Version/4.0 Chrome/107.0 Mobile Safari/537.36 MicroMessenger/8.0.40";
    const DESKTOP: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

    fn get<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> &'a str {
        headers.get(name).unwrap().to_str().unwrap()
    }

    #[test]
    fn test_profiles() {
        let iphone = DeviceProfile::from_user_agent(IPHONE);
        assert!(iphone.mobile && iphone.ios && iphone.safari);
        assert!(!iphone.android);

        let android = DeviceProfile::from_user_agent(ANDROID_CHROME);
        assert!(android.mobile && android.android && android.chrome);
        assert!(!android.safari);

        assert!(DeviceProfile::from_user_agent(WECHAT).wechat);

        let desktop = DeviceProfile::from_user_agent(DESKTOP);
        assert!(!desktop.mobile);
        assert_eq!(desktop.device_type(), "desktop");
    }

    #[test]
    fn test_mobile_request_uses_wider_list() {
        let tablet = "Mozilla/5.0 (Linux; U; en-us; KFAPWI Build/JDQ39) Silk/3.13 like Chrome/27 Tablet";
        assert!(is_mobile_request(tablet));
        assert!(!DeviceProfile::from_user_agent(tablet).mobile);
        assert!(!is_mobile_request(DESKTOP));
    }

    #[test]
    fn test_desktop_headers() {
        let headers = DeviceProfile::from_user_agent(DESKTOP).file_headers("Clip.mp4", 2048);
        assert_eq!(get(&headers, header::CONTENT_TYPE), "video/mp4");
        assert_eq!(get(&headers, header::CONTENT_DISPOSITION), "attachment; filename=\"Clip.mp4\"");
        assert_eq!(get(&headers, header::CONTENT_LENGTH), "2048");
        assert_eq!(get(&headers, header::CACHE_CONTROL), "public, max-age=0");
        assert!(headers.get(header::PRAGMA).is_none());
    }

    #[test]
    fn test_ios_plays_inline() {
        let headers = DeviceProfile::from_user_agent(IPHONE).file_headers("Clip.mp4", 10);
        assert_eq!(get(&headers, header::CONTENT_TYPE), "video/mp4");
        assert_eq!(get(&headers, header::CONTENT_DISPOSITION), "inline; filename=\"Clip.mp4\"");
        assert_eq!(get(&headers, header::PRAGMA), "no-cache");
        assert_eq!(get(&headers, header::EXPIRES), "0");
    }

    #[test]
    fn test_android_variants() {
        let chrome = DeviceProfile::from_user_agent(ANDROID_CHROME).file_headers("Clip.mp4", 10);
        assert_eq!(get(&chrome, header::CONTENT_TYPE), "application/octet-stream");
        assert_eq!(get(&chrome, header::CONTENT_DISPOSITION), "attachment; filename=\"Clip.mp4\"");

        let firefox = DeviceProfile::from_user_agent(ANDROID_FIREFOX).file_headers("Clip.mp4", 10);
        assert_eq!(
            get(&firefox, header::CONTENT_DISPOSITION),
            "attachment; filename=\"Clip.mp4\"; filename*=UTF-8''Clip.mp4"
        );

        let wechat = DeviceProfile::from_user_agent(WECHAT).file_headers("Clip.mp4", 10);
        assert_eq!(get(&wechat, header::CONTENT_TYPE), "video/mp4");
    }

    #[test]
    fn test_non_ascii_names_stay_valid() {
        let headers = DeviceProfile::from_user_agent(DESKTOP).file_headers("测试 video：1.mp4", 10);
        let disposition = get(&headers, header::CONTENT_DISPOSITION);
        assert!(disposition.starts_with("attachment; filename=\"video_1.mp4\""));
        assert!(disposition.contains("filename*=UTF-8''%E6%B5%8B%E8%AF%95"));
    }

    #[test]
    fn test_ascii_fallback() {
        assert_eq!(ascii_fallback("plain.mp4"), "plain.mp4");
        assert_eq!(ascii_fallback("视频.mp4"), "video.mp4");
        assert_eq!(ascii_fallback("say \"hi\".webm"), "say _hi.webm");
    }

    #[test]
    fn test_cleanup_delay() {
        let settings = AppSettings::default();
        assert_eq!(
            DeviceProfile::from_user_agent(IPHONE).cleanup_delay(&settings),
            Duration::from_secs(60)
        );
        assert_eq!(
            DeviceProfile::from_user_agent(DESKTOP).cleanup_delay(&settings),
            Duration::from_secs(30)
        );
    }
}
