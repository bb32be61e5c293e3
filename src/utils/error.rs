//! Error types for the crawl side of the scanner
//!
//! Fetch and parse failures never stop a polling loop; they are logged and the
//! page is retried on the next pass.

use thiserror::Error;

/// Errors that can occur during HTTP fetching operations
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with something other than 200 OK
    #[error("Server error: {0}")]
    ServerError(u16),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Map a reqwest error, keeping timeouts distinct
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(err)
        }
    }
}

/// Errors that can occur during page parsing
#[derive(Error, Debug)]
pub enum ParseError {
    /// Page body is not valid UTF-8
    #[error("Page body is not valid UTF-8")]
    InvalidEncoding,

    /// Listing container not found in the page
    #[error("Listing section not found")]
    ListingNotFound,

    /// Parser-specific failure
    #[error("Parse failed: {0}")]
    Other(String),
}

/// Errors produced while crawling a single page
#[derive(Error, Debug)]
pub enum CrawlerError {
    /// Fetch error
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// The consumer dropped the item stream
    #[error("Item stream closed")]
    StreamClosed,
}
