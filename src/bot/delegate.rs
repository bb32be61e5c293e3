//! Callbacks the conversation state machine hands its decisions to
//!
//! Each callback is its own trait so a caller can plug in exactly the pieces it
//! needs. [`ScanDelegate`] implements the subscription-related ones on top of
//! the scan [`Orchestrator`].

use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

use super::{messages, BotError};
use crate::models::SubscriberKey;
use crate::scanner::{Orchestrator, ScanError};

/// A user asked to watch `filter`; returns the reply text on success
#[async_trait]
pub trait OnSubscribe: Send + Sync {
    async fn on_subscribe(&self, key: &SubscriberKey, filter: &Url) -> Result<String, BotError>;
}

/// A user asked to stop; returns the reply text on success
#[async_trait]
pub trait OnStop: Send + Sync {
    async fn on_stop(&self, key: &SubscriberKey) -> Result<String, BotError>;
}

/// The user is gone from the chat; nothing is replied
#[async_trait]
pub trait OnKicked: Send + Sync {
    async fn on_kicked(&self, key: &SubscriberKey) -> Result<(), BotError>;
}

/// First contact with a user
#[async_trait]
pub trait OnWelcome: Send + Sync {
    async fn on_welcome(&self, key: &SubscriberKey) -> Result<(), BotError>;
}

/// Welcome callback that does nothing
pub struct NoopWelcome;

#[async_trait]
impl OnWelcome for NoopWelcome {
    async fn on_welcome(&self, _key: &SubscriberKey) -> Result<(), BotError> {
        Ok(())
    }
}

/// The full set of callbacks used by the bot
#[derive(Clone)]
pub struct Delegates {
    pub subscribe: Arc<dyn OnSubscribe>,
    pub stop: Arc<dyn OnStop>,
    pub kicked: Arc<dyn OnKicked>,
    pub welcome: Arc<dyn OnWelcome>,
}

impl Delegates {
    /// Route subscribe, stop and kick to one scan delegate
    pub fn scan(delegate: Arc<ScanDelegate>) -> Self {
        Self {
            subscribe: delegate.clone(),
            stop: delegate.clone(),
            kicked: delegate,
            welcome: Arc::new(NoopWelcome),
        }
    }

    pub fn with_welcome(mut self, welcome: Arc<dyn OnWelcome>) -> Self {
        self.welcome = welcome;
        self
    }
}

/// Subscription callbacks backed by the scan orchestrator
pub struct ScanDelegate {
    orchestrator: Arc<Orchestrator>,
    pages: usize,
}

impl ScanDelegate {
    pub fn new(orchestrator: Arc<Orchestrator>, pages: usize) -> Self {
        Self {
            orchestrator,
            pages: pages.max(1),
        }
    }
}

#[async_trait]
impl OnSubscribe for ScanDelegate {
    async fn on_subscribe(&self, key: &SubscriberKey, filter: &Url) -> Result<String, BotError> {
        let user = &key.username;
        let urls = Orchestrator::page_urls(filter, self.pages);

        self.orchestrator
            .register(key, urls)
            .await
            .map_err(|e| match e {
                ScanError::AlreadyExists(_) => BotError::delegate(messages::already_subscribed(user), e),
                _ => BotError::delegate(messages::subscribe_failed(user), e),
            })?;

        if let Err(e) = self.orchestrator.start(key).await {
            // Registered but not running: undo so the user can retry.
            if let Err(rollback) = self.orchestrator.unregister(key).await {
                tracing::warn!(key = %key, error = %rollback, "Rollback after failed start failed");
            }
            return Err(BotError::delegate(messages::start_failed(user), e));
        }

        Ok(messages::subscribed(user))
    }
}

#[async_trait]
impl OnStop for ScanDelegate {
    async fn on_stop(&self, key: &SubscriberKey) -> Result<String, BotError> {
        let user = &key.username;
        match self.orchestrator.unregister(key).await {
            Ok(()) => Ok(messages::stopped(user)),
            Err(e @ ScanError::NotFound(_)) => Err(BotError::delegate(messages::not_subscribed(user), e)),
            Err(e) => Err(BotError::delegate(messages::unsubscribe_failed(user), e)),
        }
    }
}

#[async_trait]
impl OnKicked for ScanDelegate {
    async fn on_kicked(&self, key: &SubscriberKey) -> Result<(), BotError> {
        self.orchestrator
            .unregister(key)
            .await
            .map_err(|e| BotError::delegate(messages::unsubscribe_failed(&key.username), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::PageFetcher;
    use crate::parser::{system_clock, LineParser};
    use crate::scanner::{Notifier, ScanConfig};
    use crate::storage::{MemoryStore, Persister};
    use std::time::Duration;

    struct Silent;

    #[async_trait]
    impl Notifier for Silent {
        async fn notify(&self, _key: &SubscriberKey, _item_id: &str) {}
    }

    fn delegate() -> (ScanDelegate, Arc<Orchestrator>) {
        let config = ScanConfig {
            interval: Duration::from_secs(3600),
            page_delay: Duration::from_millis(1),
            ..ScanConfig::default()
        };
        let orchestrator = Arc::new(Orchestrator::new(
            config.clone(),
            Arc::new(LineParser::new(system_clock(config.time_zone))),
            PageFetcher::new().unwrap(),
            Arc::new(MemoryStore::new()),
            Persister::new(Duration::from_secs(5)),
            Arc::new(Silent),
        ));
        (ScanDelegate::new(orchestrator.clone(), 2), orchestrator)
    }

    fn filter() -> Url {
        Url::parse("http://127.0.0.1:9/arenda/?x=1").unwrap()
    }

    #[tokio::test]
    async fn test_subscribe_registers_every_page() {
        let (delegate, orchestrator) = delegate();
        let key = SubscriberKey::new("alice", 1);

        let text = delegate.on_subscribe(&key, &filter()).await.unwrap();
        assert_eq!(text, messages::subscribed("alice"));

        let listed = orchestrator.subscriptions().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].1.len(), 2);
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_second_subscribe_is_refused() {
        let (delegate, orchestrator) = delegate();
        let key = SubscriberKey::new("alice", 1);
        delegate.on_subscribe(&key, &filter()).await.unwrap();

        let err = delegate.on_subscribe(&key, &filter()).await.unwrap_err();
        assert_eq!(err.to_string(), messages::already_subscribed("alice"));
        assert!(orchestrator.exists(&key).await);
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_and_kick_of_unknown_key() {
        let (delegate, _) = delegate();
        let key = SubscriberKey::new("bob", 1);

        let err = delegate.on_stop(&key).await.unwrap_err();
        assert_eq!(err.to_string(), messages::not_subscribed("bob"));
        assert!(delegate.on_kicked(&key).await.is_err());
    }

    #[tokio::test]
    async fn test_stop_racing_subscribe_leaves_nothing_behind() {
        let (delegate, orchestrator) = delegate();
        let delegate = Arc::new(delegate);
        let key = SubscriberKey::new("carol", 1);

        for _ in 0..20 {
            let subscriber = {
                let (delegate, key) = (delegate.clone(), key.clone());
                tokio::spawn(async move { delegate.on_subscribe(&key, &filter()).await })
            };
            tokio::task::yield_now().await;
            let _ = delegate.on_stop(&key).await;
            let _ = subscriber.await.unwrap();
            let _ = delegate.on_stop(&key).await;
            assert!(!orchestrator.exists(&key).await);
        }
    }
}
