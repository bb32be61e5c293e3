//! HTTP page fetcher
//!
//! Plain `GET` with browser-like headers. Anything other than `200 OK` is an
//! error; the caller decides whether to skip the page.

use crate::utils::error::FetchError;
use bytes::Bytes;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT},
    Client, StatusCode,
};
use std::time::Duration;

/// User-Agent presented to the target site
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:106.0) Gecko/20100101 Firefox/106.0";

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Page fetcher shared by every crawl engine
#[derive(Clone)]
pub struct PageFetcher {
    /// HTTP client with configured timeout and compression
    client: Client,
}

impl PageFetcher {
    /// Create a fetcher with the default timeout
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the HTTP client cannot be created
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a fetcher with a custom request timeout
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the HTTP client cannot be created
    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .default_headers(Self::build_headers())
            .build()?;

        Ok(Self { client })
    }

    /// Fetch one page body
    ///
    /// # Errors
    ///
    /// `InvalidUrl` for unparseable input, `ServerError` for any status but 200,
    /// `Timeout`/`Http` for transport failures.
    pub async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        let parsed = url::Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;

        tracing::debug!(url = %url, "Fetching page");

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::ServerError(status.as_u16()));
        }

        response.bytes().await.map_err(FetchError::from_reqwest)
    }

    /// Headers sent with every request
    fn build_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        headers.insert(ACCEPT, HeaderValue::from_static("text/html"));
        headers
    }
}
