//! Keyword-based classification of extractor failures
//!
//! yt-dlp reports failures as free text. The cascade needs one bit out of
//! it (stop now, or try the next strategy) and the user needs a readable
//! message, so messages are matched against ordered keyword rules. The
//! first rule that matches decides.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PaymentRequired,
    AuthRequired,
    NetworkAuthIssue,
    AccessDenied,
    Copyright,
    RegionRestricted,
    NetworkGeoFalsePositive,
    TemporarilyUnavailable,
    SslError,
    NetworkTimeout,
    NetworkError,
    JsonError,
    ServerError,
    RateLimited,
    FormatError,
    ExtractionError,
    CodecError,
    PermissionDenied,
    DiskFull,
    PathError,
    PostprocessError,
    ComplexError,
    ServerResponseError,
    InvalidUrl,
    #[serde(rename = "unknown_error")]
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::PaymentRequired => "payment_required",
            ErrorKind::AuthRequired => "auth_required",
            ErrorKind::NetworkAuthIssue => "network_auth_issue",
            ErrorKind::AccessDenied => "access_denied",
            ErrorKind::Copyright => "copyright",
            ErrorKind::RegionRestricted => "region_restricted",
            ErrorKind::NetworkGeoFalsePositive => "network_geo_false_positive",
            ErrorKind::TemporarilyUnavailable => "temporarily_unavailable",
            ErrorKind::SslError => "ssl_error",
            ErrorKind::NetworkTimeout => "network_timeout",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::JsonError => "json_error",
            ErrorKind::ServerError => "server_error",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::FormatError => "format_error",
            ErrorKind::ExtractionError => "extraction_error",
            ErrorKind::CodecError => "codec_error",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::DiskFull => "disk_full",
            ErrorKind::PathError => "path_error",
            ErrorKind::PostprocessError => "postprocess_error",
            ErrorKind::ComplexError => "complex_error",
            ErrorKind::ServerResponseError => "server_response_error",
            ErrorKind::InvalidUrl => "invalid_url",
            ErrorKind::Unknown => "unknown_error",
        }
    }

    /// Fatal kinds fail the same way whatever format or headers are tried
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorKind::PaymentRequired
                | ErrorKind::AuthRequired
                | ErrorKind::AccessDenied
                | ErrorKind::Copyright
                | ErrorKind::PermissionDenied
                | ErrorKind::DiskFull
                | ErrorKind::InvalidUrl
        )
    }

    fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::PaymentRequired => "This video is paid content and must be purchased before it can be downloaded",
            ErrorKind::AuthRequired => "An account login is required to download this video",
            ErrorKind::NetworkAuthIssue => "Network authentication problem, trying another connection",
            ErrorKind::AccessDenied => "The video cannot be accessed; it may be deleted or private",
            ErrorKind::Copyright => "This video cannot be downloaded because of a copyright claim",
            ErrorKind::RegionRestricted => "Access restriction detected, trying a workaround",
            ErrorKind::NetworkGeoFalsePositive => "A network problem looked like a region block, retrying",
            ErrorKind::TemporarilyUnavailable => "The video is temporarily unavailable, trying another strategy",
            ErrorKind::SslError => "SSL certificate problem, trying another secure connection",
            ErrorKind::NetworkTimeout => "Network connection timed out, retrying",
            ErrorKind::NetworkError => "Network connection problem, trying another route",
            ErrorKind::JsonError => "The server returned malformed data, retrying",
            ErrorKind::ServerError => "The server is temporarily unavailable, retrying",
            ErrorKind::RateLimited => "Too many requests, waiting before retrying",
            ErrorKind::FormatError => "Could not get the video formats, trying another strategy",
            ErrorKind::ExtractionError => "Video information extraction failed, trying another method",
            ErrorKind::CodecError => "The video encoding is problematic, trying another format",
            ErrorKind::PermissionDenied => "Insufficient permission to write the file; check the download directory",
            ErrorKind::DiskFull => "Not enough disk space; free some space and retry",
            ErrorKind::PathError => "The file path is problematic, trying to fix it",
            ErrorKind::PostprocessError => "Post-processing failed, but the download may have completed",
            ErrorKind::ComplexError => "Ran into a complex problem, retrying",
            ErrorKind::ServerResponseError => "Unexpected server response, retrying",
            ErrorKind::InvalidUrl => "The link is not a supported video URL",
            ErrorKind::Unknown => "Ran into an unknown problem, trying another strategy",
        }
    }
}

/// Outcome of classifying one error message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorAnalysis {
    pub kind: ErrorKind,
    pub fatal: bool,
    pub user_message: String,
}

impl ErrorAnalysis {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            fatal: kind.is_fatal(),
            user_message: kind.user_message().to_string(),
        }
    }
}

const AUTH_STATUS: &[&str] = &["forbidden", "403", "unauthorized", "401"];
const NETWORK_HINTS: &[&str] = &["ssl", "certificate", "https", "timeout", "connection"];
const GEO_NETWORK_HINTS: &[&str] = &["network", "connection", "timeout", "ssl", "dns", "resolve"];

/// First-match keyword rules after the special cases in [`analyze_error`]
const RULES: &[(&[&str], ErrorKind)] = &[
    (&["ssl", "certificate", "cert", "https", "handshake", "tls"], ErrorKind::SslError),
    (&["timeout", "超时", "timed out"], ErrorKind::NetworkTimeout),
    (&["connection", "连接", "network", "unreachable", "resolve", "dns"], ErrorKind::NetworkError),
    (&["json", "expecting value", "decode", "parse"], ErrorKind::JsonError),
    (&["api", "server error", "500", "502", "503", "504"], ErrorKind::ServerError),
    (&["rate limit", "too many requests", "429"], ErrorKind::RateLimited),
    (&["format", "no formats", "unable to extract", "no video"], ErrorKind::FormatError),
    (&["extractor", "extraction", "failed to extract"], ErrorKind::ExtractionError),
    (&["codec", "encoding", "corrupt", "invalid"], ErrorKind::CodecError),
    (&["permission", "access denied", "readonly"], ErrorKind::PermissionDenied),
    (&["disk full", "no space", "磁盘已满"], ErrorKind::DiskFull),
    (&["filename", "path", "directory"], ErrorKind::PathError),
    (&["ffmpeg", "ffprobe", "postprocessor"], ErrorKind::PostprocessError),
];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Classify an extractor error message
pub fn analyze_error(message: &str) -> ErrorAnalysis {
    let lower = message.to_lowercase();

    if contains_any(&lower, &["付费", "payment", "premium", "大会员", "vip", "paid"]) {
        return ErrorAnalysis::new(ErrorKind::PaymentRequired);
    }

    if contains_any(&lower, &["登录", "login", "auth"]) {
        if contains_any(&lower, AUTH_STATUS) && contains_any(&lower, NETWORK_HINTS) {
            return ErrorAnalysis::new(ErrorKind::NetworkAuthIssue);
        }
        return ErrorAnalysis::new(ErrorKind::AuthRequired);
    }

    if contains_any(&lower, &["private", "私有", "deleted", "删除", "不存在", "removed"]) {
        return ErrorAnalysis::new(ErrorKind::AccessDenied);
    }

    if contains_any(&lower, &["copyright", "版权", "dmca", "takedown"]) {
        return ErrorAnalysis::new(ErrorKind::Copyright);
    }

    if contains_any(&lower, &["地区", "region", "blocked", "限制", "restricted", "geo"]) {
        let kind = if contains_any(&lower, GEO_NETWORK_HINTS) {
            ErrorKind::NetworkGeoFalsePositive
        } else if contains_any(&lower, &["unavailable", "不可用", "not available"]) {
            ErrorKind::TemporarilyUnavailable
        } else {
            ErrorKind::RegionRestricted
        };
        return ErrorAnalysis::new(kind);
    }

    if let Some((_, kind)) = RULES.iter().find(|(needles, _)| contains_any(&lower, needles)) {
        return ErrorAnalysis::new(*kind);
    }

    if message.chars().count() > 100 {
        ErrorAnalysis::new(ErrorKind::ComplexError)
    } else if contains_any(&lower, &["404", "403", "500", "error", "failed", "unable"]) {
        ErrorAnalysis::new(ErrorKind::ServerResponseError)
    } else {
        ErrorAnalysis::new(ErrorKind::Unknown)
    }
}
