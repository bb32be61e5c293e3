//! Scan orchestrator
//!
//! Owns one [`Subscription`] per subscriber: a crawl engine polling the
//! subscriber's filter pages plus a dedup cache of the listings already
//! reported. Newly seen listings go to the [`Notifier`]; the cache is mirrored to
//! the durable store through the shared [`Persister`] and read back on start.
//!
//! A single lock guards every subscription and cache. Lock scopes only ever
//! cover in-memory work; store calls happen either before taking the lock or on
//! the persister's background tasks.

pub mod cache;
pub mod error;

pub use cache::{retention_cutoff, DedupCache};
pub use error::ScanError;

use async_trait::async_trait;
use chrono::FixedOffset;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use url::Url;

use crate::crawler::{CrawlEngine, EngineConfig, PageFetcher, DEFAULT_INTERVAL, DEFAULT_PAGE_DELAY};
use crate::lifecycle::{Cleaner, ShutdownTarget};
use crate::models::{DiscoveredItem, SubscriberKey};
use crate::parser::SharedParser;
use crate::storage::{self, Persister, SharedStore};
use crate::utils;

/// Default retention window of dedup entries
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Default budget of a single store call
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// Receives every listing a subscription has not reported before
///
/// Called outside the orchestrator lock, once per item and in stream order;
/// implementations may wait for buffer space.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, key: &SubscriberKey, item_id: &str);
}

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub interval: Duration,
    pub page_delay: Duration,
    pub time_zone: FixedOffset,
    pub cache_capacity: usize,
    pub retention: Duration,
    pub store_timeout: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            page_delay: DEFAULT_PAGE_DELAY,
            time_zone: utils::default_utc_offset(),
            cache_capacity: cache::DEFAULT_CAPACITY,
            retention: DEFAULT_RETENTION,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }
}

impl ScanConfig {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_interval(self.interval)
            .with_page_delay(self.page_delay)
    }
}

/// Per-subscriber scan state
struct Subscription {
    engine: CrawlEngine,
    cache: DedupCache,
    /// Distinguishes this registration from an earlier one under the same key
    generation: u64,
}

/// State reachable from the background consumers
struct Shared {
    subscriptions: RwLock<HashMap<SubscriberKey, Subscription>>,
    store: SharedStore,
    persister: Persister,
    notifier: Arc<dyn Notifier>,
    config: ScanConfig,
}

/// Registry and driver of every subscription
pub struct Orchestrator {
    shared: Arc<Shared>,
    parser: SharedParser,
    fetcher: PageFetcher,
    next_generation: AtomicU64,
}

impl Orchestrator {
    pub fn new(
        config: ScanConfig,
        parser: SharedParser,
        fetcher: PageFetcher,
        store: SharedStore,
        persister: Persister,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                subscriptions: RwLock::new(HashMap::new()),
                store,
                persister,
                notifier,
                config,
            }),
            parser,
            fetcher,
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.shared.config
    }

    /// Per-page URLs for a filter: `page=1..=pages` appended to its query
    ///
    /// A `page` parameter already present in the filter is dropped; every other
    /// parameter keeps its position.
    pub fn page_urls(filter: &Url, pages: usize) -> Vec<String> {
        let kept: Vec<(String, String)> = filter
            .query_pairs()
            .filter(|(name, _)| name != "page")
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();

        (1..=pages.max(1))
            .map(|page| {
                let mut url = filter.clone();
                url.query_pairs_mut()
                    .clear()
                    .extend_pairs(&kept)
                    .append_pair("page", &page.to_string());
                url.to_string()
            })
            .collect()
    }

    /// Create an idle subscription for `key`
    pub async fn register(&self, key: &SubscriberKey, urls: Vec<String>) -> Result<(), ScanError> {
        let mut subscriptions = self.shared.subscriptions.write().await;
        if subscriptions.contains_key(key) {
            return Err(ScanError::AlreadyExists(key.clone()));
        }

        let engine = CrawlEngine::new(
            urls,
            Arc::clone(&self.parser),
            self.fetcher.clone(),
            self.shared.config.engine_config(),
        );
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        subscriptions.insert(
            key.clone(),
            Subscription {
                engine,
                cache: DedupCache::with_capacity(self.shared.config.cache_capacity),
                generation,
            },
        );

        tracing::info!(key = %key, "Subscription registered");
        Ok(())
    }

    /// Start polling for `key`
    ///
    /// Returns after the persisted dedup entries have been loaded (or the load
    /// gave up); items are consumed on a background task from then on.
    pub async fn start(&self, key: &SubscriberKey) -> Result<(), ScanError> {
        let (stream, generation) = {
            let subscriptions = self.shared.subscriptions.write().await;
            let subscription = subscriptions
                .get(key)
                .ok_or_else(|| ScanError::NotFound(key.clone()))?;
            let stream = subscription
                .engine
                .start()
                .ok_or_else(|| ScanError::AlreadyRunning(key.clone()))?;
            (stream, subscription.generation)
        };

        self.shared.recover(key, generation).await;

        tokio::spawn(Arc::clone(&self.shared).consume(key.clone(), generation, stream));
        tracing::info!(key = %key, "Subscription started");
        Ok(())
    }

    /// Stop and forget the subscription for `key`
    pub async fn unregister(&self, key: &SubscriberKey) -> Result<(), ScanError> {
        let removed = self.shared.subscriptions.write().await.remove(key);
        let subscription = removed.ok_or_else(|| ScanError::NotFound(key.clone()))?;
        subscription.engine.stop();

        let store = Arc::clone(&self.shared.store);
        let record = key.dedup_record();
        self.shared.persister.spawn(
            "del",
            record.clone(),
            async move { store.delete_key(&record).await }.boxed(),
        );

        tracing::info!(key = %key, "Subscription removed");
        Ok(())
    }

    pub async fn exists(&self, key: &SubscriberKey) -> bool {
        self.shared.subscriptions.read().await.contains_key(key)
    }

    /// Registered keys with their page URLs, ordered by key
    pub async fn subscriptions(&self) -> Vec<(SubscriberKey, Vec<String>)> {
        let subscriptions = self.shared.subscriptions.read().await;
        let mut listed: Vec<_> = subscriptions
            .iter()
            .map(|(key, sub)| (key.clone(), sub.engine.urls().to_vec()))
            .collect();
        listed.sort_by(|a, b| a.0.cmp(&b.0));
        listed
    }

    pub async fn cached_items(&self, key: &SubscriberKey) -> Option<usize> {
        let subscriptions = self.shared.subscriptions.read().await;
        subscriptions.get(key).map(|sub| sub.cache.len())
    }

    pub async fn passes(&self, key: &SubscriberKey) -> Option<u64> {
        let subscriptions = self.shared.subscriptions.read().await;
        subscriptions.get(key).map(|sub| sub.engine.passes())
    }

    pub async fn is_running(&self, key: &SubscriberKey) -> bool {
        let subscriptions = self.shared.subscriptions.read().await;
        subscriptions
            .get(key)
            .is_some_and(|sub| sub.engine.is_running())
    }

    /// Evict dedup entries older than the retention window
    ///
    /// Returns the number of entries evicted across all subscriptions.
    pub async fn clean(&self) -> usize {
        let config = &self.shared.config;
        let Some(cutoff) = retention_cutoff(utils::today(&config.time_zone), config.retention)
        else {
            return 0;
        };

        let mut evicted = 0;
        let mut subscriptions = self.shared.subscriptions.write().await;
        for (key, subscription) in subscriptions.iter_mut() {
            let stale = subscription.cache.evict_before(cutoff);
            if stale.is_empty() {
                continue;
            }
            evicted += stale.len();

            let store = Arc::clone(&self.shared.store);
            let record = key.dedup_record();
            self.shared.persister.spawn(
                "srem",
                record.clone(),
                async move { store.remove_set_members(&record, &stale).await }.boxed(),
            );
        }

        tracing::info!(evicted, cutoff = %cutoff, "Dedup caches cleaned");
        evicted
    }

    /// Stop every engine
    ///
    /// Subscriptions stay registered; the process is exiting, not unsubscribing.
    /// Pending store writes are flushed by the store's own shutdown.
    pub async fn shutdown(&self) {
        let subscriptions = self.shared.subscriptions.write().await;
        for subscription in subscriptions.values() {
            subscription.engine.stop();
        }
        tracing::info!(stopped = subscriptions.len(), "Crawl engines stopped");
    }

    #[cfg(test)]
    async fn observe(&self, key: &SubscriberKey, item: DiscoveredItem) -> Option<bool> {
        let generation = {
            let subscriptions = self.shared.subscriptions.read().await;
            subscriptions.get(key)?.generation
        };
        let fresh = self.shared.observe(key, generation, &item).await?;
        if fresh {
            self.shared.notifier.notify(key, &item.id).await;
        }
        Some(fresh)
    }
}

impl Shared {
    /// Merge the persisted dedup entries of `key` into its cache
    ///
    /// Bounded by the store timeout; failures leave the cache as it was.
    async fn recover(&self, key: &SubscriberKey, generation: u64) {
        let record = key.dedup_record();
        let loaded = match storage::with_timeout(
            self.config.store_timeout,
            self.store.get_set_members(&record),
        )
        .await
        {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(key = %record, error = %e, "Failed to load dedup entries");
                return;
            }
        };
        if loaded.is_empty() {
            return;
        }

        let today = utils::today(&self.config.time_zone);
        let mut subscriptions = self.subscriptions.write().await;
        if let Some(subscription) = subscriptions
            .get_mut(key)
            .filter(|sub| sub.generation == generation)
        {
            let added = subscription.cache.merge_recovered(loaded, today);
            tracing::info!(key = %key, added, "Dedup entries recovered");
        }
    }

    /// Drain one engine stream until it closes or the subscription is replaced
    async fn consume(
        self: Arc<Self>,
        key: SubscriberKey,
        generation: u64,
        mut stream: mpsc::Receiver<DiscoveredItem>,
    ) {
        while let Some(item) = stream.recv().await {
            match self.observe(&key, generation, &item).await {
                Some(true) => self.notifier.notify(&key, &item.id).await,
                Some(false) => {}
                None => break,
            }
        }
        tracing::debug!(key = %key, "Item stream closed");
    }

    /// Record one item, returning whether it is new; `None` once the
    /// subscription is gone
    async fn observe(
        &self,
        key: &SubscriberKey,
        generation: u64,
        item: &DiscoveredItem,
    ) -> Option<bool> {
        let mut subscriptions = self.subscriptions.write().await;
        let subscription = subscriptions
            .get_mut(key)
            .filter(|sub| sub.generation == generation)?;

        let fresh = subscription.cache.observe(&item.id, item.observed_on);
        if fresh {
            let store = Arc::clone(&self.store);
            let record = key.dedup_record();
            let members = vec![item.id.clone()];
            self.persister.spawn(
                "sadd",
                record.clone(),
                async move { store.add_set_members(&record, &members).await }.boxed(),
            );
        }
        Some(fresh)
    }
}

#[async_trait]
impl Cleaner for Orchestrator {
    fn name(&self) -> &str {
        "scanner"
    }

    async fn clean(&self) {
        Orchestrator::clean(self).await;
    }
}

#[async_trait]
impl ShutdownTarget for Orchestrator {
    fn name(&self) -> &str {
        "scanner"
    }

    async fn shutdown(&self) -> crate::error::Result<()> {
        Orchestrator::shutdown(self).await;
        Ok(())
    }
}
