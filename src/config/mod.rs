//! Configuration management for krisha-scan
//!
//! Loaded from environment variables (the deployed service's names) or from a
//! TOML file. Durations are kept as Go-style strings (`30s`, `5m`, `1h30m`) and
//! parsed by the accessors, which also apply the "at least the default" rule.

use anyhow::{Context, Result};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::crawler::{fetcher::DEFAULT_REQUEST_TIMEOUT, DEFAULT_INTERVAL, DEFAULT_PAGE_DELAY};
use crate::lifecycle::{DEFAULT_CLEANUP_INTERVAL, DEFAULT_SHUTDOWN_TIMEOUT};
use crate::scanner::{cache::DEFAULT_CAPACITY, ScanConfig, DEFAULT_RETENTION};
use crate::storage::StoreConfig;
use crate::transport::outbox::{DEFAULT_BUFFER, DEFAULT_SEND_DELAY};
use crate::transport::telegram::{DEFAULT_API_URL, DEFAULT_SENDS_PER_SECOND, DEFAULT_UPDATE_TIMEOUT};
use crate::utils::{self, at_least_or_default, format_duration, parse_duration, parse_utc_offset};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Scan orchestrator and crawler
    pub scanner: ScannerConfig,

    /// Messaging bot
    pub bot: BotConfig,

    /// Durable store
    pub store: StoreConfig,

    /// Cleanup and shutdown
    pub lifecycle: LifecycleConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Poll interval
    pub interval: String,

    /// UTC offset the scan day is computed in
    pub time_zone: String,

    /// Initial dedup cache size per subscription
    pub visited_buf_size: usize,

    /// How long an unseen listing stays deduplicated
    pub retention_policy: String,

    /// Result pages polled per subscription
    pub pages: usize,

    /// Pause between two pages of one pass
    pub pages_delay: String,

    /// Host every filter URL must belong to
    pub target_host: String,

    /// Page request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            interval: format_duration(DEFAULT_INTERVAL),
            time_zone: utils::format_utc_offset(&utils::default_utc_offset()),
            visited_buf_size: DEFAULT_CAPACITY,
            retention_policy: format_duration(DEFAULT_RETENTION),
            pages: 1,
            pages_delay: format_duration(DEFAULT_PAGE_DELAY),
            target_host: "krisha.kz".to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
        }
    }
}

/// Bot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Bot API token
    pub api_token: String,

    /// Bot API base URL
    pub api_url: String,

    /// Outbound buffer capacity
    pub send_msg_buffer: usize,

    /// Nap of the send loop when idle
    pub send_msg_delay: String,

    /// Long-poll timeout in seconds
    pub update_timeout_secs: u64,

    /// Cap on outgoing messages per second
    pub sends_per_second: u32,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            api_token: String::new(),
            api_url: DEFAULT_API_URL.to_string(),
            send_msg_buffer: DEFAULT_BUFFER,
            send_msg_delay: format_duration(DEFAULT_SEND_DELAY),
            update_timeout_secs: DEFAULT_UPDATE_TIMEOUT.as_secs(),
            sends_per_second: DEFAULT_SENDS_PER_SECOND,
        }
    }
}

/// Lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Time between cleanup sweeps
    pub cleansing_interval: String,

    /// Budget for the whole shutdown
    pub graceful_shutdown_timeout: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            cleansing_interval: format_duration(DEFAULT_CLEANUP_INTERVAL),
            graceful_shutdown_timeout: format_duration(DEFAULT_SHUTDOWN_TIMEOUT),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

/// Read an environment variable, treating empty values as unset
fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env(name).and_then(|v| v.trim().parse().ok())
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        let scanner = &mut config.scanner;
        if let Some(v) = env("SCANNER_INTERVAL") {
            scanner.interval = v;
        }
        if let Some(v) = env("SCANNER_TIME_ZONE") {
            scanner.time_zone = v;
        }
        if let Some(v) = env_parse("SCANNER_VISITED_BUF_SIZE") {
            scanner.visited_buf_size = v;
        }
        if let Some(v) = env("SCANNER_RETENTION_POLICY") {
            scanner.retention_policy = v;
        }
        if let Some(v) = env_parse("SCANNER_PAGES") {
            scanner.pages = v;
        }
        if let Some(v) = env("SCANNER_PAGES_DELAY") {
            scanner.pages_delay = v;
        }
        if let Some(v) = env("SCANNER_TARGET_HOST") {
            scanner.target_host = v;
        }

        let bot = &mut config.bot;
        if let Some(v) = env("BOT_API_TOKEN") {
            bot.api_token = v;
        }
        if let Some(v) = env("BOT_API_URL") {
            bot.api_url = v;
        }
        if let Some(v) = env_parse("BOT_SEND_MSG_BUFFER") {
            bot.send_msg_buffer = v;
        }
        if let Some(v) = env("BOT_SEND_MSG_DELAY") {
            bot.send_msg_delay = v;
        }
        if let Some(v) = env_parse("BOT_UPDATE_TIMEOUT") {
            bot.update_timeout_secs = v;
        }

        config.store = StoreConfig::from_env();

        if let Some(v) = env("CACHE_CLEANSING_INTERVAL") {
            config.lifecycle.cleansing_interval = v;
        }
        if let Some(v) = env("GRACEFUL_SHUTDOWN_TIMEOUT") {
            config.lifecycle.graceful_shutdown_timeout = v;
        }

        if let Some(v) = env("LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Some(v) = env("LOG_FORMAT") {
            config.logging.format = v;
        }

        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Render as TOML with the bot token masked
    pub fn to_toml(&self) -> Result<String> {
        let mut shown = self.clone();
        if !shown.bot.api_token.is_empty() {
            shown.bot.api_token = "***".to_string();
        }
        toml::to_string_pretty(&shown).context("Failed to serialize config")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.poll_interval()?;
        self.time_zone()?;
        self.retention()?;
        self.page_delay()?;
        self.send_delay()?;
        self.cleanup_interval()?;

        if self.scanner.target_host.trim().is_empty() {
            anyhow::bail!("scanner.target_host must not be empty");
        }

        if self.scanner.request_timeout_secs == 0 {
            anyhow::bail!("scanner.request_timeout_secs must be greater than 0");
        }

        if self.store.pool_size == 0 {
            anyhow::bail!("store.pool_size must be greater than 0");
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("logging.format must be text or json, got {:?}", self.logging.format);
        }

        Ok(())
    }

    /// Validation for running the service, which also needs a bot token
    pub fn validate_for_run(&self) -> Result<()> {
        self.validate()?;
        if self.bot.api_token.trim().is_empty() {
            anyhow::bail!("bot.api_token (BOT_API_TOKEN) is required");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Result<Duration> {
        let interval = parse_duration(&self.scanner.interval).context("scanner.interval")?;
        Ok(at_least_or_default(interval, DEFAULT_INTERVAL))
    }

    pub fn time_zone(&self) -> Result<FixedOffset> {
        parse_utc_offset(&self.scanner.time_zone).context("scanner.time_zone")
    }

    pub fn retention(&self) -> Result<Duration> {
        let retention =
            parse_duration(&self.scanner.retention_policy).context("scanner.retention_policy")?;
        Ok(at_least_or_default(retention, DEFAULT_RETENTION))
    }

    pub fn cache_capacity(&self) -> usize {
        at_least_or_default(self.scanner.visited_buf_size, DEFAULT_CAPACITY)
    }

    pub fn pages(&self) -> usize {
        self.scanner.pages.max(1)
    }

    pub fn page_delay(&self) -> Result<Duration> {
        parse_duration(&self.scanner.pages_delay).context("scanner.pages_delay")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.scanner.request_timeout_secs)
    }

    pub fn send_buffer(&self) -> usize {
        at_least_or_default(self.bot.send_msg_buffer, DEFAULT_BUFFER)
    }

    pub fn send_delay(&self) -> Result<Duration> {
        let delay = parse_duration(&self.bot.send_msg_delay).context("bot.send_msg_delay")?;
        Ok(at_least_or_default(delay, DEFAULT_SEND_DELAY))
    }

    pub fn update_timeout(&self) -> Duration {
        Duration::from_secs(self.bot.update_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Result<Duration> {
        parse_duration(&self.lifecycle.cleansing_interval).context("lifecycle.cleansing_interval")
    }

    /// Shutdown budget; falls back to the default when unset or unparseable
    pub fn shutdown_timeout(&self) -> Duration {
        parse_duration(&self.lifecycle.graceful_shutdown_timeout)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT)
    }

    /// Settings of the scan orchestrator
    pub fn scan_config(&self) -> Result<ScanConfig> {
        Ok(ScanConfig {
            interval: self.poll_interval()?,
            page_delay: self.page_delay()?,
            time_zone: self.time_zone()?,
            cache_capacity: self.cache_capacity(),
            retention: self.retention()?,
            store_timeout: self.store.timeout(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval().unwrap(), Duration::from_secs(300));
        assert_eq!(config.retention().unwrap(), Duration::from_secs(24 * 3600));
        assert_eq!(config.page_delay().unwrap(), Duration::from_secs(30));
        assert_eq!(config.cleanup_interval().unwrap(), Duration::from_secs(3600));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(15));
        assert_eq!(config.time_zone().unwrap().local_minus_utc(), 5 * 3600);
        assert_eq!(config.pages(), 1);
    }

    #[test]
    fn test_values_below_default_are_clamped() {
        let mut config = Config::default();
        config.scanner.interval = "10s".into();
        config.scanner.retention_policy = "1h".into();
        config.scanner.visited_buf_size = 5;
        config.bot.send_msg_buffer = 1;
        config.bot.send_msg_delay = "1s".into();

        assert_eq!(config.poll_interval().unwrap(), DEFAULT_INTERVAL);
        assert_eq!(config.retention().unwrap(), DEFAULT_RETENTION);
        assert_eq!(config.cache_capacity(), DEFAULT_CAPACITY);
        assert_eq!(config.send_buffer(), DEFAULT_BUFFER);
        assert_eq!(config.send_delay().unwrap(), DEFAULT_SEND_DELAY);
    }

    #[test]
    fn test_values_above_default_are_kept() {
        let mut config = Config::default();
        config.scanner.interval = "10m".into();
        config.scanner.retention_policy = "48h".into();
        config.scanner.visited_buf_size = 500;

        assert_eq!(config.poll_interval().unwrap(), Duration::from_secs(600));
        assert_eq!(config.retention().unwrap(), Duration::from_secs(48 * 3600));
        assert_eq!(config.cache_capacity(), 500);
    }

    #[test]
    fn test_shutdown_timeout_fallback() {
        let mut config = Config::default();
        config.lifecycle.graceful_shutdown_timeout = "soon".into();
        assert_eq!(config.shutdown_timeout(), DEFAULT_SHUTDOWN_TIMEOUT);

        config.lifecycle.graceful_shutdown_timeout = "3s".into();
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let mut config = Config::default();
        config.scanner.time_zone = "Asia/Almaty".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.format = "xml".into();
        assert!(config.validate().is_err());

        let config = Config::default();
        assert!(config.validate_for_run().is_err());
    }

    #[test]
    fn test_toml_masks_token() {
        let mut config = Config::default();
        config.bot.api_token = "123:secret".into();
        let rendered = config.to_toml().unwrap();
        assert!(!rendered.contains("secret"));

        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.scanner.interval, config.scanner.interval);
    }

    #[test]
    fn test_scan_config() {
        let scan = Config::default().scan_config().unwrap();
        assert_eq!(scan.cache_capacity, 100);
        assert_eq!(scan.store_timeout, Duration::from_secs(120));
    }
}
