//! Video extraction: URL handling, metadata and the yt-dlp backend

pub mod cookies;
pub mod models;
pub mod traits;
pub mod url;
pub mod ytdlp;

pub use models::{Platform, VideoInfo};
pub use traits::{ExtractJob, Extractor};
pub use url::{normalize, NormalizedUrl, ShortLinkResolver};
pub use ytdlp::YtDlpExtractor;
