//! Byte transport and bundled resources used by the update pipeline.
//!
//! The pipeline only needs "fetch the bytes behind a resource locator" and
//! "read a resource shipped with this build". Both are traits so tests and
//! embedders can substitute their own implementations. Dropping an in-flight
//! [`Transport::fetch`] future aborts the request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info, warn};
use url::Url;

// ============================================================================
// Transport Contract
// ============================================================================

/// Transport-level outcome of a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Success,
    Failure,
    Cancelled,
}

/// HTTP status code for a successful response.
pub const RESPONSE_OK: u16 = 200;

/// Everything the pipeline learns from one fetch.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: FetchStatus,
    pub response_code: u16,
    pub bytes: Option<Vec<u8>>,
    /// Human-readable failure detail, if any.
    pub detail: Option<String>,
}

impl FetchResponse {
    pub fn ok(bytes: Vec<u8>) -> Self {
        Self {
            status: FetchStatus::Success,
            response_code: RESPONSE_OK,
            bytes: Some(bytes),
            detail: None,
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            status: FetchStatus::Failure,
            response_code: 0,
            bytes: None,
            detail: Some(detail.into()),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: FetchStatus::Cancelled,
            response_code: 0,
            bytes: None,
            detail: None,
        }
    }

    /// Payload of a usable response: success status, code 200 and a non-empty
    /// body. Anything else yields `None`.
    pub fn into_payload(self) -> Option<Vec<u8>> {
        match self.bytes {
            Some(bytes)
                if self.status == FetchStatus::Success
                    && self.response_code == RESPONSE_OK
                    && !bytes.is_empty() =>
            {
                Some(bytes)
            }
            _ => None,
        }
    }

    /// Short description used in transport errors.
    pub fn describe(&self) -> String {
        match (&self.status, &self.detail) {
            (_, Some(detail)) => detail.clone(),
            (FetchStatus::Success, None) if self.response_code != RESPONSE_OK => {
                format!("status {}", self.response_code)
            }
            (FetchStatus::Success, None) => "empty response body".to_string(),
            (status, None) => format!("{:?}", status),
        }
    }
}

/// Fetches bytes from a named resource.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, resource: &str) -> FetchResponse;
}

/// Reads resources shipped inside the running build.
pub trait ResourceBundle: Send + Sync {
    fn read_bundled_resource(&self, dir: &str, name: &str) -> Option<Vec<u8>>;
}

// ============================================================================
// URL Security Validation
// ============================================================================

/// Validates that a resource locator is safe to fetch.
///
/// Checks:
/// - URL must parse and have a host
/// - Scheme must be HTTPS, except plain HTTP to a loopback host
pub fn validate_url(url_str: &str) -> anyhow::Result<Url> {
    let url = Url::parse(url_str).map_err(|e| anyhow::anyhow!("Invalid URL {}: {}", url_str, e))?;

    let host = url
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("URL must have a host: {}", url_str))?;

    let loopback = matches!(host, "localhost" | "127.0.0.1" | "[::1]");
    match url.scheme() {
        "https" => {}
        "http" if loopback => {}
        _ => anyhow::bail!("URL must use HTTPS: {}", url_str),
    }

    Ok(url)
}

// ============================================================================
// Download Progress
// ============================================================================

/// Progress information during a download.
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    /// Bytes downloaded so far.
    pub bytes_downloaded: u64,
    /// Total bytes expected (if known from Content-Length header).
    pub total_bytes: Option<u64>,
    /// Progress percentage (0.0 to 100.0), or None if total is unknown.
    pub percent: Option<f32>,
}

impl DownloadProgress {
    fn new(bytes_downloaded: u64, total_bytes: Option<u64>) -> Self {
        let percent = total_bytes.map(|total| {
            if total > 0 {
                (bytes_downloaded as f32 / total as f32) * 100.0
            } else {
                0.0
            }
        });

        Self {
            bytes_downloaded,
            total_bytes,
            percent,
        }
    }
}

/// Callback receiving download progress.
pub type ProgressCallback = Arc<dyn Fn(DownloadProgress) + Send + Sync>;

// ============================================================================
// HTTP Transport
// ============================================================================

/// [`Transport`] backed by reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
    progress: Option<ProgressCallback>,
}

impl HttpTransport {
    /// Creates a transport with an overall request timeout.
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("sheetwork-updater/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            progress: None,
        })
    }

    /// Registers a callback invoked as body chunks arrive.
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    fn report(&self, progress: DownloadProgress) {
        if let Some(cb) = &self.progress {
            cb(progress);
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, resource: &str) -> FetchResponse {
        let url = match validate_url(resource) {
            Ok(url) => url,
            Err(e) => {
                warn!(resource, error = %e, "Refusing to fetch resource");
                return FetchResponse::failure(e.to_string());
            }
        };

        info!("Fetching {}", url);

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => return FetchResponse::failure(format!("request failed: {}", e)),
        };

        let response_code = response.status().as_u16();
        if !response.status().is_success() {
            return FetchResponse {
                status: FetchStatus::Success,
                response_code,
                bytes: None,
                detail: Some(format!(
                    "status {}: {}",
                    response_code,
                    response
                        .status()
                        .canonical_reason()
                        .unwrap_or("Unknown error")
                )),
            };
        }

        let total_bytes = response.content_length();
        debug!("Content-Length: {:?}", total_bytes);

        let mut stream = response.bytes_stream();
        let mut body = Vec::with_capacity(total_bytes.unwrap_or(0).min(64 * 1024 * 1024) as usize);

        self.report(DownloadProgress::new(0, total_bytes));

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => {
                    body.extend_from_slice(&chunk);
                    self.report(DownloadProgress::new(body.len() as u64, total_bytes));
                }
                Err(e) => return FetchResponse::failure(format!("failed reading body: {}", e)),
            }
        }

        info!("Fetched {} bytes from {}", body.len(), resource);
        FetchResponse {
            status: FetchStatus::Success,
            response_code,
            bytes: Some(body),
            detail: None,
        }
    }
}

// ============================================================================
// Bundled Resources
// ============================================================================

/// Directory holding the bundled install scripts.
pub const INSTRUCTIONS_DIR: &str = "instructions";

const BUNDLED: &[(&str, &str, &[u8])] = &[
    (
        INSTRUCTIONS_DIR,
        "update.sh",
        include_bytes!("../../resources/instructions/update.sh"),
    ),
    (
        INSTRUCTIONS_DIR,
        "update.bat",
        include_bytes!("../../resources/instructions/update.bat"),
    ),
];

/// Resources compiled into the binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct BundledResources;

impl ResourceBundle for BundledResources {
    fn read_bundled_resource(&self, dir: &str, name: &str) -> Option<Vec<u8>> {
        BUNDLED
            .iter()
            .find(|(d, n, _)| *d == dir && *n == name)
            .map(|(_, _, bytes)| bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_progress_calculation() {
        let progress = DownloadProgress::new(50, Some(100));
        assert_eq!(progress.bytes_downloaded, 50);
        assert_eq!(progress.total_bytes, Some(100));
        assert_eq!(progress.percent, Some(50.0));

        let progress_no_total = DownloadProgress::new(50, None);
        assert_eq!(progress_no_total.percent, None);

        let progress_zero_total = DownloadProgress::new(0, Some(0));
        assert_eq!(progress_zero_total.percent, Some(0.0));
    }

    #[test]
    fn test_validate_url_https_required() {
        assert!(validate_url("http://releases.example.com/file.zip").is_err());
        assert!(validate_url("https://releases.example.com/file.zip").is_ok());
        assert!(validate_url("http://127.0.0.1:8080/release.xml").is_ok());
        assert!(validate_url("http://localhost/release.xml").is_ok());
    }

    #[test]
    fn test_validate_url_invalid() {
        assert!(validate_url("not-a-url").is_err());
        assert!(validate_url("").is_err());
        assert!(validate_url("file:///etc/passwd").is_err());
    }

    #[test]
    fn test_payload_requires_success_ok_and_body() {
        assert_eq!(FetchResponse::ok(vec![1, 2]).into_payload(), Some(vec![1, 2]));
        assert_eq!(FetchResponse::ok(Vec::new()).into_payload(), None);
        assert_eq!(FetchResponse::failure("boom").into_payload(), None);
        assert_eq!(FetchResponse::cancelled().into_payload(), None);

        let not_found = FetchResponse {
            status: FetchStatus::Success,
            response_code: 404,
            bytes: Some(vec![1]),
            detail: None,
        };
        assert_eq!(not_found.clone().into_payload(), None);
        assert_eq!(not_found.describe(), "status 404");
    }

    #[test]
    fn test_bundled_scripts_present() {
        let bundle = BundledResources;
        let sh = bundle
            .read_bundled_resource(INSTRUCTIONS_DIR, "update.sh")
            .unwrap();
        assert!(sh.starts_with(b"#!"));
        assert!(bundle
            .read_bundled_resource(INSTRUCTIONS_DIR, "update.bat")
            .is_some());
        assert!(bundle
            .read_bundled_resource(INSTRUCTIONS_DIR, "missing.sh")
            .is_none());
        assert!(bundle.read_bundled_resource("other", "update.sh").is_none());
    }

    #[tokio::test]
    async fn test_http_transport_rejects_insecure_url() {
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let response = transport.fetch("http://releases.example.com/a.zip").await;
        assert_eq!(response.status, FetchStatus::Failure);
        assert!(response.describe().contains("HTTPS"));
    }
}
