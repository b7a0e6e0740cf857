//! Single byte-range requests for served files

use axum::http::HeaderValue;

/// Outcome of matching a `Range` header against a file of known size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// No usable range; send the whole file
    Full,
    /// Inclusive `start..=end`
    Partial { start: u64, end: u64 },
    /// Starts past the end of the file
    Unsatisfiable,
}

impl ByteRange {
    /// Interpret `header` for a file of `size` bytes.
    ///
    /// Only `bytes=` with a single range is honoured; anything else
    /// (multi-range, other units, garbage) falls back to the full body.
    pub fn parse(header: Option<&HeaderValue>, size: u64) -> Self {
        let Some(value) = header.and_then(|h| h.to_str().ok()) else {
            return ByteRange::Full;
        };
        let Some(ranges) = value.trim().strip_prefix("bytes=") else {
            return ByteRange::Full;
        };
        let ranges = ranges.trim();
        if ranges.is_empty() || ranges.contains(',') {
            return ByteRange::Full;
        }
        let Some((start, end)) = ranges.split_once('-') else {
            return ByteRange::Full;
        };
        let (start, end) = (start.trim(), end.trim());

        if start.is_empty() {
            // "-N" is the last N bytes
            return match end.parse::<u64>() {
                Ok(0) | Err(_) => ByteRange::Full,
                Ok(_) if size == 0 => ByteRange::Unsatisfiable,
                Ok(n) => ByteRange::Partial {
                    start: size.saturating_sub(n),
                    end: size - 1,
                },
            };
        }

        let Ok(start) = start.parse::<u64>() else {
            return ByteRange::Full;
        };
        if start >= size {
            return ByteRange::Unsatisfiable;
        }
        let end = if end.is_empty() {
            size - 1
        } else {
            match end.parse::<u64>() {
                Ok(end) if end >= start => end.min(size - 1),
                _ => return ByteRange::Full,
            }
        };

        ByteRange::Partial { start, end }
    }

    /// Value for `Content-Range` on a 206 or 416 response
    pub fn content_range(&self, size: u64) -> Option<String> {
        match self {
            ByteRange::Full => None,
            ByteRange::Partial { start, end } => Some(format!("bytes {}-{}/{}", start, end, size)),
            ByteRange::Unsatisfiable => Some(format!("bytes */{}", size)),
        }
    }
}
