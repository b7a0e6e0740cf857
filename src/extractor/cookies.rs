//! Session cookies handed to yt-dlp for bilibili
//!
//! Logged-in sessions unlock the higher bilibili quality tiers. Cookies come
//! from configuration as a raw `Cookie:` header and are written out in the
//! Netscape format yt-dlp's `--cookies` flag expects.

use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

pub const BILIBILI_COOKIE_DOMAIN: &str = ".bilibili.com";

/// Cookie names that carry a bilibili session
const SESSION_COOKIES: &[&str] = &["SESSDATA", "bili_jct", "buvid3", "DedeUserID"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CookieJar {
    cookies: Vec<(String, String)>,
}

impl CookieJar {
    /// Parse `name=value; name2=value2`, keeping only session cookies
    pub fn from_header(raw: &str) -> Self {
        let mut cookies: Vec<(String, String)> = Vec::new();

        for pair in raw.split(';') {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let (name, value) = (name.trim(), value.trim());
            if value.is_empty() || !SESSION_COOKIES.contains(&name) {
                continue;
            }
            // last one wins
            cookies.retain(|(n, _)| n != name);
            cookies.push((name.to_string(), value.to_string()));
        }

        debug!("Parsed {} session cookies", cookies.len());
        Self { cookies }
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    /// Render the jar as a Netscape cookie file, valid for one day
    pub fn to_netscape(&self, domain: &str) -> String {
        let expiration = Utc::now().timestamp() + 86_400;
        let mut out = String::from("# Netscape HTTP Cookie File\n\n");
        for (name, value) in &self.cookies {
            out.push_str(&format!(
                "{}\tTRUE\t/\tFALSE\t{}\t{}\t{}\n",
                domain, expiration, name, value
            ));
        }
        out
    }

    /// Write the cookie file into `dir`; `None` when there is nothing to write
    pub async fn write_netscape(&self, dir: &Path, domain: &str) -> std::io::Result<Option<PathBuf>> {
        if self.is_empty() {
            return Ok(None);
        }

        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join("cookies.txt");
        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(self.to_netscape(domain).as_bytes()).await?;
        file.flush().await?;

        info!("Created cookie file with {} entries: {}", self.len(), path.display());
        Ok(Some(path))
    }
}
