//! Crawl engine
//!
//! One [`CrawlEngine`] polls a fixed, ordered list of page URLs for a single
//! subscription. Every pass fetches and parses each page in order and emits the
//! discovered items on an `mpsc` stream, then waits for the poll interval.
//! Fetch and parse failures are logged and the page is simply tried again on the
//! next pass; only [`CrawlEngine::stop`] (or dropping the engine) ends the loop.

pub mod fetcher;

pub use fetcher::PageFetcher;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::models::DiscoveredItem;
use crate::parser::SharedParser;
use crate::utils::error::CrawlerError;

/// Default poll interval
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default pause between two pages of the same pass
pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_secs(30);

/// Capacity of the item stream between engine and consumer
const STREAM_CAPACITY: usize = 64;

/// Engine timing
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Time between the end of one pass and the start of the next
    pub interval: Duration,

    /// Pause between pages, applied only when there is more than one page
    pub page_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            page_delay: DEFAULT_PAGE_DELAY,
        }
    }
}

impl EngineConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_page_delay(mut self, page_delay: Duration) -> Self {
        self.page_delay = page_delay;
        self
    }
}

/// Periodic poller for one subscription
pub struct CrawlEngine {
    urls: Arc<Vec<String>>,
    parser: SharedParser,
    fetcher: PageFetcher,
    config: EngineConfig,
    passes: Arc<AtomicU64>,
    started: AtomicBool,
    stop: watch::Sender<bool>,
}

impl CrawlEngine {
    pub fn new(
        urls: Vec<String>,
        parser: SharedParser,
        fetcher: PageFetcher,
        config: EngineConfig,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            urls: Arc::new(urls),
            parser,
            fetcher,
            config,
            passes: Arc::new(AtomicU64::new(0)),
            started: AtomicBool::new(false),
            stop,
        }
    }

    /// Pages polled by this engine, in order
    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Completed passes so far
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Whether the poll loop has been launched and not stopped
    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire) && !*self.stop.borrow()
    }

    /// Launch the poll loop and return its item stream
    ///
    /// The first pass starts immediately. Returns `None` if the engine was
    /// already started; an engine runs at most once.
    pub fn start(&self) -> Option<mpsc::Receiver<DiscoveredItem>> {
        if self.started.swap(true, Ordering::AcqRel) {
            return None;
        }

        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        let poller = Poller {
            urls: Arc::clone(&self.urls),
            parser: Arc::clone(&self.parser),
            fetcher: self.fetcher.clone(),
            config: self.config,
            passes: Arc::clone(&self.passes),
            stop: self.stop.subscribe(),
            tx,
        };
        tokio::spawn(poller.run());

        Some(rx)
    }

    /// Cancel the poll loop; the item stream closes once the loop exits
    pub fn stop(&self) {
        if self.started.load(Ordering::Acquire) {
            self.stop.send_replace(true);
        }
    }
}

impl Drop for CrawlEngine {
    fn drop(&mut self) {
        self.stop.send_replace(true);
    }
}

/// State owned by the spawned poll loop
struct Poller {
    urls: Arc<Vec<String>>,
    parser: SharedParser,
    fetcher: PageFetcher,
    config: EngineConfig,
    passes: Arc<AtomicU64>,
    stop: watch::Receiver<bool>,
    tx: mpsc::Sender<DiscoveredItem>,
}

impl Poller {
    async fn run(mut self) {
        tracing::info!(pages = self.urls.len(), "Crawler started");

        loop {
            if !self.pass().await {
                break;
            }
            let done = self.passes.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::debug!(passes = done, "Crawl pass completed");

            if !self.pause(self.config.interval).await {
                break;
            }
        }

        // Dropping `self.tx` here closes the stream exactly once.
        tracing::info!("Crawler stopped");
    }

    /// One full pass over every page; false when the loop must end
    async fn pass(&mut self) -> bool {
        let urls = Arc::clone(&self.urls);
        for (i, url) in urls.iter().enumerate() {
            if i > 0 && !self.pause(self.config.page_delay).await {
                return false;
            }
            if self.is_stopped() {
                return false;
            }

            match self.crawl_page(url).await {
                Ok(count) => tracing::debug!(url = %url, items = count, "Page crawled"),
                Err(CrawlerError::StreamClosed) => return false,
                Err(e) => tracing::warn!(url = %url, error = %e, "Failed to crawl page"),
            }
        }
        true
    }

    /// Fetch, parse and emit one page
    async fn crawl_page(&mut self, url: &str) -> Result<usize, CrawlerError> {
        let body = tokio::select! {
            body = self.fetcher.fetch(url) => body?,
            _ = Self::stopped(&mut self.stop) => return Err(CrawlerError::StreamClosed),
        };

        let mut items = Vec::new();
        self.parser.parse(&body, &mut |item| items.push(item))?;

        let count = items.len();
        for item in items {
            tokio::select! {
                sent = self.tx.send(item) => sent.map_err(|_| CrawlerError::StreamClosed)?,
                _ = Self::stopped(&mut self.stop) => return Err(CrawlerError::StreamClosed),
            }
        }
        Ok(count)
    }

    /// Sleep for `duration`; false if cancelled first
    async fn pause(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_stopped(),
            _ = Self::stopped(&mut self.stop) => false,
        }
    }

    fn is_stopped(&self) -> bool {
        *self.stop.borrow() || self.tx.is_closed()
    }

    /// Resolves once stop is requested or the engine is dropped
    async fn stopped(stop: &mut watch::Receiver<bool>) {
        let _ = stop.wait_for(|stopped| *stopped).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{LineParser, Parser};
    use chrono::FixedOffset;

    fn line_parser() -> SharedParser {
        let parser: Arc<dyn Parser> = Arc::new(LineParser::new(crate::parser::system_clock(
            FixedOffset::east_opt(0).unwrap(),
        )));
        parser
    }

    fn engine(urls: Vec<String>) -> CrawlEngine {
        CrawlEngine::new(
            urls,
            line_parser(),
            PageFetcher::new().unwrap(),
            EngineConfig::default()
                .with_interval(Duration::from_millis(50))
                .with_page_delay(Duration::from_millis(5)),
        )
    }

    #[test]
    fn test_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.interval, Duration::from_secs(300));
        assert_eq!(config.page_delay, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_start_only_once() {
        let engine = engine(vec!["http://127.0.0.1:9/".to_string()]);
        assert!(engine.start().is_some());
        assert!(engine.start().is_none());
        assert!(engine.is_running());
        engine.stop();
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_stop_closes_stream() {
        let engine = engine(vec!["http://127.0.0.1:9/".to_string()]);
        let mut rx = engine.start().unwrap();
        engine.stop();

        let closed = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert!(matches!(closed, Ok(None)));
    }

    #[tokio::test]
    async fn test_drop_closes_stream() {
        let engine = engine(vec!["http://127.0.0.1:9/".to_string()]);
        let mut rx = engine.start().unwrap();
        drop(engine);

        let closed = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert!(matches!(closed, Ok(None)));
    }

    #[test]
    fn test_stop_before_start_is_noop() {
        let engine = engine(Vec::new());
        engine.stop();
        assert!(!engine.is_running());
        assert_eq!(engine.passes(), 0);
    }
}
