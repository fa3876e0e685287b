//! # Feedpipe Client - The Fetch
//!
//! Downloads feed files from the marketplace feed service.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use feedpipe_client::FeedClient;
//! use feedpipe_core::{FeedRequest, FeedScope, FeedType};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let request = FeedRequest::builder()
//!         .feed_type(FeedType::Item)
//!         .category_id("625")
//!         .date("20210125")
//!         .scope(FeedScope::NewlyListed)
//!         .marketplace_id("EBAY_US")
//!         .token("v^1.1#...")
//!         .build()?;
//!
//!     let feed = FeedClient::new().fetch(&request, None).await?;
//!     println!("{} bytes -> {}", feed.bytes, feed.path.display());
//!     Ok(())
//! }
//! ```
//!
//! ## Download Protocol
//!
//! ```text
//! GET {base}/item?feed_scope=..&category_id=..&date=..
//!   Authorization: Bearer ...
//!   X-EBAY-C-MARKETPLACE-ID: EBAY_US
//!   Range: bytes=0-{chunk-1}
//!
//! 206 Partial Content             200 OK
//!   Content-Range: bytes a-b/N      whole file in one body
//!   -> request bytes=b+1-.. until N bytes are on disk
//!      (N must not change between ranges)
//! ```

use feedpipe_core::FeedRequest;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_RANGE, RANGE};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Header naming the marketplace the feed belongs to.
pub const MARKETPLACE_HEADER: &str = "X-EBAY-C-MARKETPLACE-ID";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);
const PART_SUFFIX: &str = ".part";

// =============================================================================
// ERROR TYPE
// =============================================================================

/// Errors from the feed client.
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Writing the feed file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The service answered with a non-success status.
    #[error("Service error ({status}): {message}")]
    Service { status: u16, message: String },

    /// The service broke the ranged download contract.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

// =============================================================================
// RESPONSE TYPES
// =============================================================================

/// A feed file written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFeed {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Parsed `Content-Range: bytes <first>-<last>/<total>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub first: u64,
    pub last: u64,
    pub total: u64,
}

impl ContentRange {
    /// Parse a `Content-Range` header value. Unknown totals (`*`) and
    /// inverted or out-of-bounds ranges yield `None`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let spec = value.trim().strip_prefix("bytes ")?;
        let (range, total) = spec.split_once('/')?;
        let (first, last) = range.split_once('-')?;
        let first: u64 = first.trim().parse().ok()?;
        let last: u64 = last.trim().parse().ok()?;
        let total: u64 = total.trim().parse().ok()?;
        if first > last || last >= total {
            return None;
        }
        Some(Self { first, last, total })
    }

    /// Number of bytes the range covers.
    #[must_use]
    pub fn span(&self) -> u64 {
        self.last - self.first + 1
    }
}

/// Error envelope returned by the feed service.
#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "errorId")]
    error_id: Option<i64>,
    message: Option<String>,
}

// =============================================================================
// CLIENT
// =============================================================================

/// HTTP client for the feed service.
///
/// By default the base URL and range size come from each request's
/// [`Environment`](feedpipe_core::Environment). [`FeedClient::with_base_url`]
/// pins both, which is what tests and alternate hosts use.
#[derive(Debug, Clone)]
pub struct FeedClient {
    client: reqwest::Client,
    base_url: Option<String>,
    chunk_size: Option<u64>,
}

impl Default for FeedClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedClient {
    /// Create a client that follows each request's environment.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .timeout(REQUEST_TIMEOUT)
                .user_agent(concat!("feedpipe/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_default(),
            base_url: None,
            chunk_size: None,
        }
    }

    /// Create a client bound to a fixed base URL and range size.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let client = FeedClient::with_base_url("http://localhost:8080", 1024);
    /// ```
    pub fn with_base_url(base_url: impl Into<String>, chunk_size: u64) -> Self {
        Self {
            base_url: Some(base_url.into()),
            chunk_size: Some(chunk_size.max(1)),
            ..Self::new()
        }
    }

    /// Download the feed file described by `request` into `target_dir`
    /// (the current directory when `None`).
    ///
    /// The file is written as `<name>.part` and renamed once complete; a
    /// failed download leaves nothing behind.
    pub async fn fetch(
        &self,
        request: &FeedRequest,
        target_dir: Option<&Path>,
    ) -> Result<FetchedFeed, Error> {
        let dir = match target_dir {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir()?,
        };
        tokio::fs::create_dir_all(&dir).await?;

        let file_name = request.file_name();
        let final_path = dir.join(&file_name);
        let part_path = dir.join(format!("{}{}", file_name, PART_SUFFIX));

        tracing::info!(
            feed_type = %request.feed_type(),
            category = request.category_id(),
            date = request.date().as_str(),
            "Downloading feed to {}",
            final_path.display()
        );

        match self.download_to(request, &part_path).await {
            Ok(bytes) => {
                tokio::fs::rename(&part_path, &final_path).await?;
                tracing::info!("Downloaded {} bytes to {}", bytes, final_path.display());
                Ok(FetchedFeed {
                    path: final_path,
                    bytes,
                })
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part_path).await;
                Err(e)
            }
        }
    }

    fn endpoint(&self, request: &FeedRequest) -> String {
        let base = self
            .base_url
            .as_deref()
            .unwrap_or_else(|| request.environment().base_url());
        format!("{}/{}", base.trim_end_matches('/'), request.endpoint_path())
    }

    fn chunk_size(&self, request: &FeedRequest) -> u64 {
        self.chunk_size
            .unwrap_or_else(|| request.environment().chunk_size())
    }

    /// Fetch every range into `part_path`. Returns the bytes written.
    async fn download_to(&self, request: &FeedRequest, part_path: &Path) -> Result<u64, Error> {
        let url = self.endpoint(request);
        let chunk_size = self.chunk_size(request);
        let query = request.query_pairs();
        let mut file = tokio::fs::File::create(part_path).await?;
        let mut start: u64 = 0;
        let mut expected_total: Option<u64> = None;

        loop {
            let end = start.saturating_add(chunk_size - 1);
            let mut response = self
                .client
                .get(&url)
                .query(&query)
                .header(AUTHORIZATION, request.token())
                .header(MARKETPLACE_HEADER, request.marketplace_id())
                .header(ACCEPT, "application/json")
                .header(RANGE, format!("bytes={}-{}", start, end))
                .send()
                .await?;

            match response.status() {
                StatusCode::OK => {
                    if start != 0 {
                        return Err(Error::Protocol(format!(
                            "range request at offset {} answered with the whole file",
                            start
                        )));
                    }
                    let written = write_body(&mut response, &mut file).await?;
                    file.flush().await?;
                    return Ok(written);
                }
                StatusCode::PARTIAL_CONTENT => {
                    let range = content_range(&response)?;
                    if let Some(total) = expected_total.filter(|t| *t != range.total) {
                        return Err(Error::Protocol(format!(
                            "feed size changed from {} to {} bytes mid-download",
                            total, range.total
                        )));
                    }
                    expected_total = Some(range.total);
                    if range.first != start {
                        return Err(Error::Protocol(format!(
                            "expected range starting at {}, got {}",
                            start, range.first
                        )));
                    }
                    let written = write_body(&mut response, &mut file).await?;
                    if written != range.span() {
                        return Err(Error::Protocol(format!(
                            "range {}-{} carried {} bytes",
                            range.first, range.last, written
                        )));
                    }
                    start = range.last + 1;
                    tracing::debug!("Received bytes {}-{} of {}", range.first, range.last, range.total);
                    if start >= range.total {
                        file.flush().await?;
                        return Ok(start);
                    }
                }
                status => return Err(service_error(status, response).await),
            }
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn write_body(
    response: &mut reqwest::Response,
    file: &mut tokio::fs::File,
) -> Result<u64, Error> {
    let mut written: u64 = 0;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    Ok(written)
}

fn content_range(response: &reqwest::Response) -> Result<ContentRange, Error> {
    let value = response
        .headers()
        .get(CONTENT_RANGE)
        .ok_or_else(|| Error::Protocol(String::from("206 response without Content-Range")))?;
    let text = value
        .to_str()
        .map_err(|_| Error::Protocol(String::from("Content-Range is not ASCII")))?;
    ContentRange::parse(text)
        .ok_or_else(|| Error::Protocol(format!("unparseable Content-Range '{}'", text)))
}

async fn service_error(status: StatusCode, response: reqwest::Response) -> Error {
    let body = response.text().await.unwrap_or_default();
    Error::Service {
        status: status.as_u16(),
        message: error_message(status, &body),
    }
}

/// Messages from the service's error envelope, else the raw body, else the
/// status reason.
fn error_message(status: StatusCode, body: &str) -> String {
    let envelope: ErrorEnvelope = serde_json::from_str(body).unwrap_or_default();
    let messages: Vec<String> = envelope
        .errors
        .iter()
        .filter_map(|e| match (&e.message, e.error_id) {
            (Some(message), Some(id)) => Some(format!("{} (errorId {})", message, id)),
            (Some(message), None) => Some(message.clone()),
            (None, _) => None,
        })
        .collect();

    if !messages.is_empty() {
        messages.join("; ")
    } else if !body.trim().is_empty() {
        body.trim().to_string()
    } else {
        status
            .canonical_reason()
            .unwrap_or("unknown status")
            .to_string()
    }
}

// =============================================================================
// TESTS
// =============================================================================
