//! Unified error handling for the krisha-scan crate
//!
//! Every module keeps its own error enum; [`Error`] wraps them all so errors can
//! cross module boundaries without losing detail.
//!
//! # Architecture
//!
//! - [`CategorizedError`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification deciding whether an error is replied to,
//!   logged and retried, or logged and dropped
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use krisha_scan::error::{CategorizedError, Error};
//!
//! fn handle_error(err: Error) {
//!     if err.is_user_facing() {
//!         reply(err.to_string());
//!     } else {
//!         tracing::warn!(category = %err.category(), error = %err, "operation failed");
//!     }
//! }
//! ```

use std::fmt;
use std::io;
use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::bot::BotError;
pub use crate::models::DecodeError;
pub use crate::scanner::ScanError;
pub use crate::storage::StoreError;
pub use crate::transport::TransportError;
pub use crate::utils::error::{CrawlerError, FetchError, ParseError};

/// Common trait for all crate error types
pub trait CategorizedError: std::error::Error {
    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;

    /// Check if this error is transient and worth retrying later
    fn is_recoverable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transport | ErrorCategory::Persistence
        )
    }

    /// Check if this error is answered with a reply to the user
    fn is_user_facing(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::NotFound | ErrorCategory::AlreadyExists | ErrorCategory::Validation
        )
    }
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// No subscription or state for the key
    NotFound,
    /// Duplicate registration
    AlreadyExists,
    /// Malformed or foreign-host filter URL
    Validation,
    /// Fetch or send failure
    Transport,
    /// Store timeout or failure
    Persistence,
    /// Corrupt persisted record
    Decode,
    /// Configuration errors
    Config,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::Validation => "validation",
            Self::Transport => "transport",
            Self::Persistence => "persistence",
            Self::Decode => "decode",
            Self::Config => "config",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for the krisha-scan crate
#[derive(Error, Debug)]
pub enum Error {
    /// Subscription lifecycle errors
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    /// Conversation errors; the message is the user reply
    #[error("Bot error: {0}")]
    Bot(#[from] BotError),

    /// Store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Crawler-related errors (fetch, parse, crawl)
    #[error("Crawler error: {0}")]
    Crawler(#[from] CrawlerError),

    /// Fetch-specific errors
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Parse-specific errors
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Messaging transport errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Corrupt persisted data
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl CategorizedError for ScanError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::AlreadyExists(_) | Self::AlreadyRunning(_) => ErrorCategory::AlreadyExists,
        }
    }
}

impl CategorizedError for StoreError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Decode(_) => ErrorCategory::Decode,
            _ => ErrorCategory::Persistence,
        }
    }
}

impl CategorizedError for FetchError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidUrl(_) => ErrorCategory::Validation,
            _ => ErrorCategory::Transport,
        }
    }
}

impl CategorizedError for CrawlerError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Fetch(e) => e.category(),
            Self::Parse(_) => ErrorCategory::Decode,
            Self::StreamClosed => ErrorCategory::Other,
        }
    }
}

impl CategorizedError for TransportError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Decode(_) => ErrorCategory::Decode,
            _ => ErrorCategory::Transport,
        }
    }
}

impl CategorizedError for Error {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Scan(e) => e.category(),
            Self::Bot(e) => e.category(),
            Self::Store(e) => e.category(),
            Self::Crawler(e) => e.category(),
            Self::Fetch(e) => e.category(),
            Self::Parse(_) | Self::Decode(_) => ErrorCategory::Decode,
            Self::Transport(e) => e.category(),
            Self::Io(_) => ErrorCategory::Persistence,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
