//! krisha-scan - classifieds search watcher
//!
//! Users subscribe from a chat with a search-filter URL; the service re-scans the
//! filter's result pages on an interval and messages each listing it has not
//! reported before.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`crawler`] - Periodic page polling per subscription
//! - [`parser`] - HTML parsing of listing pages
//! - [`scanner`] - Subscription registry, dedup caches and notification
//! - [`bot`] - Conversation state machine and its delegates
//! - [`transport`] - Chat events, outbound buffer and the Telegram client
//! - [`storage`] - Durable key/hash/set store (Redis, in-memory)
//! - [`lifecycle`] - Cleanup loop, signals and graceful shutdown
//! - [`models`] - Core data structures and types
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use krisha_scan::config::Config;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     config.validate()?;
//!     println!("{}", config.to_toml()?);
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod config;
pub mod crawler;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod parser;
pub mod scanner;
pub mod storage;
pub mod transport;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::bot::{BotService, Delegates, ScanDelegate};
    pub use crate::config::Config;
    pub use crate::crawler::{CrawlEngine, EngineConfig, PageFetcher};
    pub use crate::error::{CategorizedError, Error, ErrorCategory, Result};
    pub use crate::models::{ChatId, ConversationState, DiscoveredItem, SubscriberKey};
    pub use crate::parser::{ListingParser, Parser};
    pub use crate::scanner::{Notifier, Orchestrator, ScanConfig};
    pub use crate::storage::{MemoryStore, Persister, RedisStore, Store};
}

// Direct re-exports for convenience
pub use models::{ChatId, ConversationState, DiscoveredItem, SubscriberKey};
