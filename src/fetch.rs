//! Generic URL-content fetching.
//!
//! The pipeline consumes fetching through the [`Fetcher`] trait; the bundled
//! [`HttpFetcher`] streams the response body with a mid-stream size cap so an
//! oversized payload is abandoned as soon as the cap is exceeded rather than
//! after the full transfer. Privileged users bypass the cap.

use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

use crate::config::TransferConfig;
use crate::error::{Error, Result};
use crate::types::FetchedFile;

/// Browser user-agent sent on fetch requests; some hosts refuse unknown agents
const FETCH_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:60.0) Gecko/20100101 Firefox/60.0";

/// Name used when nothing in the response suggests one
const FALLBACK_NAME: &str = "file";

/// Fetch collaborator consumed by the upload pipeline
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url`, enforcing `max_size` unless `privileged`
    async fn fetch(&self, url: &str, max_size: u64, privileged: bool) -> Result<FetchedFile>;
}

/// HTTP fetcher with streaming size enforcement and filename inference
pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher with the configured fetch timeout
    pub fn new(config: &TransferConfig) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(FETCH_USER_AGENT)
            .connect_timeout(config.fetch_timeout)
            .timeout(fetch_deadline(config.fetch_timeout))
            .build()
            .unwrap_or_default();
        Self { http }
    }
}

/// The per-request timeout covers the whole body transfer, so it is wider
/// than the connect timeout.
fn fetch_deadline(connect: Duration) -> Duration {
    connect * 40
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, max_size: u64, privileged: bool) -> Result<FetchedFile> {
        let url = if url.contains("://") {
            url.to_string()
        } else {
            format!("http://{}", url)
        };

        let mut response = self.http.get(&url).send().await?.error_for_status()?;
        let filename = infer_filename(&response);

        let mut data = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            data.extend_from_slice(&chunk);
            if !privileged && data.len() as u64 > max_size {
                tracing::warn!(url = %url, cap = max_size, "fetch exceeded size cap, aborting");
                return Err(Error::TooBig { limit: max_size });
            }
        }

        let size = data.len() as u64;
        tracing::debug!(url = %url, size, filename = %filename, "fetched payload");
        Ok(FetchedFile {
            filename,
            data,
            size,
        })
    }
}

/// Infer a filename: `Content-Disposition`, else the final URL's last path
/// segment; if neither carries an extension, append one mapped from the
/// content type.
#[allow(clippy::expect_used)]
fn infer_filename(response: &reqwest::Response) -> String {
    static DISPOSITION_RE: OnceLock<Regex> = OnceLock::new();
    let re =
        DISPOSITION_RE.get_or_init(|| Regex::new("filename=(.+)").expect("static pattern"));

    let from_header = response
        .headers()
        .get("content-disposition")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| re.captures(v))
        .map(|c| c[1].trim_matches('"').to_string());

    let name = match from_header {
        Some(name) if !name.is_empty() => name,
        _ => {
            let segment = response
                .url()
                .path_segments()
                .and_then(|segments| segments.last())
                .unwrap_or_default();
            urlencoding::decode(segment)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| segment.to_string())
        }
    };

    if name.contains('.') {
        return name;
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    let base = if name.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        name
    };
    format!("{}{}", base, extension_for(&content_type))
}

/// Minimal content-type to extension map, mirroring what peers actually serve
fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "text/plain" => ".txt",
        "text/html" => ".html",
        "image/jpeg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "application/pdf" => ".pdf",
        "application/zip" => ".zip",
        "application/json" => ".json",
        "application/octet-stream" => ".bin",
        "video/mp4" => ".mp4",
        "audio/mpeg" => ".mp3",
        _ => "",
    }
}
