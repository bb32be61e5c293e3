//! Conversation state machine
//!
//! Interprets chat events per subscriber and drives the subscription delegates.
//!
//! # States
//!
//! A key is absent until its first `/start`, then `Default` until a `/url`
//! subscription succeeds, then `Subscribed` until `/stop` or a kick resets it.
//!
//! # Locking
//!
//! All conversation data sits behind one `RwLock` and is touched in one of two
//! shapes:
//!
//! - full-exclusive: write lock held across the delegate call and the mutation
//!   (`/start`, bot removed from a chat)
//! - read-then-write: the delegate runs under the read lock and yields the
//!   mutation, which is then applied under the write lock (`/url`, `/stop`,
//!   kicks). Two events for the same key may interleave between the phases.

pub mod delegate;
pub mod messages;
pub mod state;

pub use delegate::{Delegates, NoopWelcome, OnKicked, OnStop, OnSubscribe, OnWelcome, ScanDelegate};
pub use state::ConversationTable;

use async_trait::async_trait;
use futures::future::join_all;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use url::Url;

use crate::error::{CategorizedError, ErrorCategory};
use crate::lifecycle::{Cancel, Cleaner, ShutdownTarget};
use crate::models::{ConversationState, SubscriberKey, CONVERSATION_PREFIX};
use crate::scanner::ScanError;
use crate::storage::{self, KeyType, Persister, SharedStore, StoreError, StoreResult};
use crate::transport::{Event, EventHandler, MemberStatus, OutboundMessage};

/// Pattern matching every conversation record
pub const RECORD_PATTERN: &str = "bot;usr:*;chat:*";

/// Keys fetched per recovery scan step
const RECOVERY_SCAN_COUNT: usize = 10;

/// Conversation failures; the display text is what the user is sent
#[derive(Debug, Error)]
pub enum BotError {
    /// Malformed or foreign filter URL
    #[error("{0}")]
    Validation(String),

    /// `/start` while subscribed
    #[error("{0}")]
    AlreadyRegistered(String),

    /// A delegate refused or failed
    #[error("{message}")]
    Delegate {
        message: String,
        #[source]
        source: Option<ScanError>,
    },
}

impl BotError {
    pub fn delegate(message: impl Into<String>, source: ScanError) -> Self {
        Self::Delegate {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Delegate failure with no underlying scan error
    pub fn refused(message: impl Into<String>) -> Self {
        Self::Delegate {
            message: message.into(),
            source: None,
        }
    }
}

impl CategorizedError for BotError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Validation,
            Self::AlreadyRegistered(_) => ErrorCategory::AlreadyExists,
            Self::Delegate {
                source: Some(source),
                ..
            } => source.category(),
            Self::Delegate { source: None, .. } => ErrorCategory::Other,
        }
    }
}

type Reply = Result<Option<String>, BotError>;

/// Conversation front end of the bot
pub struct BotService {
    table: RwLock<ConversationTable>,
    delegates: Delegates,
    store: SharedStore,
    store_timeout: Duration,
    bot_username: String,
    target_host: String,
    cancel: Cancel,
}

impl BotService {
    pub fn new(
        store: SharedStore,
        persister: Persister,
        delegates: Delegates,
        bot_username: impl Into<String>,
        target_host: impl Into<String>,
    ) -> Self {
        let store_timeout = persister.timeout();
        Self {
            table: RwLock::new(ConversationTable::new(store.clone(), persister)),
            delegates,
            store,
            store_timeout,
            bot_username: bot_username.into(),
            target_host: target_host.into(),
            cancel: Cancel::new(),
        }
    }

    /// Cancel `cancel` when the service shuts down
    pub fn with_cancel(mut self, cancel: Cancel) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn bot_username(&self) -> &str {
        &self.bot_username
    }

    pub async fn state(&self, key: &SubscriberKey) -> Option<ConversationState> {
        self.table.read().await.state(key)
    }

    pub async fn url(&self, key: &SubscriberKey) -> Option<String> {
        self.table.read().await.url(key).map(str::to_string)
    }

    pub async fn chat_members(&self, chat_id: crate::models::ChatId) -> Vec<SubscriberKey> {
        self.table.read().await.chat_members(chat_id)
    }

    /// Process one event; returns the reply to send, if any
    pub async fn dispatch(&self, event: Event) -> Option<OutboundMessage> {
        let key = event.key().clone();
        let reply = match event {
            Event::Command { key, text } => self.on_command(&key, &text).await,
            Event::MemberLeft { key } => self.on_kicked(&key).await,
            Event::BotStatusChanged { key, status } => self.on_bot_status(&key, status).await,
        };

        match reply {
            Ok(Some(text)) => Some(OutboundMessage::new(key.chat_id, text)),
            Ok(None) => None,
            Err(e) => {
                tracing::info!(key = %key, category = %e.category(), error = %e, "Request rejected");
                Some(OutboundMessage::new(key.chat_id, e.to_string()))
            }
        }
    }

    async fn on_command(&self, key: &SubscriberKey, text: &str) -> Reply {
        let text = text.trim();
        if self.is_command(text, "/start") {
            self.on_start(key).await
        } else if self.is_command(text, "/stop") {
            self.on_stop(key).await
        } else if let Some(rest) = text.strip_prefix("/url") {
            self.on_url(key, rest).await
        } else {
            Ok(None)
        }
    }

    /// `/cmd` or `/cmd@<bot>`
    fn is_command(&self, text: &str, command: &str) -> bool {
        match text.strip_prefix(command) {
            Some("") => true,
            Some(rest) => rest.strip_prefix('@') == Some(self.bot_username.as_str()),
            None => false,
        }
    }

    async fn on_start(&self, key: &SubscriberKey) -> Reply {
        let mut table = self.table.write().await;
        match table.state(key) {
            Some(ConversationState::Subscribed) => Err(BotError::AlreadyRegistered(
                messages::already_registered(&key.username),
            )),
            Some(ConversationState::Default) => Ok(Some(messages::send_filter(
                &key.username,
                &self.target_host,
            ))),
            None => {
                table.set_state(key, ConversationState::Default);
                if let Err(e) = self.delegates.welcome.on_welcome(key).await {
                    tracing::warn!(key = %key, error = %e, "Welcome callback failed");
                }
                Ok(Some(messages::WELCOME.to_string()))
            }
        }
    }

    async fn on_url(&self, key: &SubscriberKey, args: &str) -> Reply {
        let (reply, filter) = {
            let _table = self.table.read().await;
            let filter = self.parse_filter(key, args)?;
            let reply = self.delegates.subscribe.on_subscribe(key, &filter).await?;
            (reply, filter)
        };

        let mut table = self.table.write().await;
        table.set_state(key, ConversationState::Subscribed);
        table.set_url(key, filter.as_str());
        tracing::info!(key = %key, url = %filter, "Subscribed");

        Ok(Some(reply))
    }

    /// Validate the argument of `/url`: an absolute URL on the target host
    fn parse_filter(&self, key: &SubscriberKey, args: &str) -> Result<Url, BotError> {
        let mention = format!("@{}", self.bot_username);
        let raw = args.strip_prefix(mention.as_str()).unwrap_or(args).trim();

        let filter = Url::parse(raw)
            .map_err(|_| BotError::Validation(messages::invalid_url(&key.username)))?;
        if filter.host_str() != Some(self.target_host.as_str()) {
            return Err(BotError::Validation(messages::foreign_host(
                &key.username,
                &self.target_host,
            )));
        }

        tracing::info!(key = %key, url = %filter, "Scan requested");
        Ok(filter)
    }

    async fn on_stop(&self, key: &SubscriberKey) -> Reply {
        let outcome = {
            let _table = self.table.read().await;
            self.delegates.stop.on_stop(key).await
        };

        // The reset happens whatever the delegate said.
        self.reset(key).await;
        outcome.map(Some)
    }

    async fn on_kicked(&self, key: &SubscriberKey) -> Reply {
        {
            let _table = self.table.read().await;
            if let Err(e) = self.delegates.kicked.on_kicked(key).await {
                tracing::debug!(key = %key, error = %e, "Kick callback failed");
            }
        }

        // Kicks apply to any state, including keys never seen before.
        self.table
            .write()
            .await
            .set_state(key, ConversationState::Default);
        Ok(None)
    }

    /// Force a known key back to Default
    async fn reset(&self, key: &SubscriberKey) {
        let mut table = self.table.write().await;
        if table.state(key).is_some() {
            table.set_state(key, ConversationState::Default);
        }
    }

    async fn on_bot_status(&self, key: &SubscriberKey, status: MemberStatus) -> Reply {
        tracing::info!(key = %key, status = ?status, "Bot membership changed");
        match status {
            MemberStatus::Kicked => self.on_kicked(key).await,
            MemberStatus::Left => {
                self.on_removed(key).await;
                Ok(None)
            }
            MemberStatus::Member => Ok(Some(messages::WELCOME.to_string())),
            MemberStatus::Other(_) => Ok(None),
        }
    }

    /// The bot left the chat: drop every subscriber of that chat
    async fn on_removed(&self, key: &SubscriberKey) {
        let mut table = self.table.write().await;
        let members = table.chat_members(key.chat_id);

        let results = join_all(
            members
                .iter()
                .map(|member| self.delegates.kicked.on_kicked(member)),
        )
        .await;
        for (member, result) in members.iter().zip(results) {
            if let Err(e) = result {
                tracing::debug!(key = %member, error = %e, "Kick callback failed");
            }
            table.delete(member);
        }

        tracing::info!(chat_id = key.chat_id.0, removed = members.len(), "Chat subscribers removed");
    }

    /// Drop every key sitting in Default
    pub async fn clean(&self) -> usize {
        let mut table = self.table.write().await;
        let idle = table.idle_keys();
        for key in &idle {
            table.delete(key);
        }
        tracing::info!(removed = idle.len(), "Idle conversations cleaned");
        idle.len()
    }

    /// Replay persisted conversations and re-subscribe them
    ///
    /// Records that fail to decode or re-subscribe are logged and skipped.
    /// Returns the number of conversations restored.
    pub async fn recover(&self) -> StoreResult<usize> {
        let mut restored = 0;
        let mut cursor = 0;
        loop {
            let (keys, next) = storage::with_timeout(
                self.store_timeout,
                self.store
                    .scan_keys(cursor, RECORD_PATTERN, RECOVERY_SCAN_COUNT, KeyType::Hash),
            )
            .await?;

            for raw in keys {
                match self.restore_record(&raw).await {
                    Ok(()) => restored += 1,
                    Err(e) => tracing::warn!(key = %raw, error = %e, "Failed to restore conversation"),
                }
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        tracing::info!(restored, "Conversations recovered");
        Ok(restored)
    }

    async fn restore_record(&self, raw: &str) -> crate::error::Result<()> {
        let key = SubscriberKey::from_record(CONVERSATION_PREFIX, raw)?;
        let (state, filter) = self.load_record(&key, raw).await?;

        self.delegates.subscribe.on_subscribe(&key, &filter).await?;

        self.table
            .write()
            .await
            .restore(&key, state, filter.to_string());
        Ok(())
    }

    async fn load_record(
        &self,
        key: &SubscriberKey,
        raw: &str,
    ) -> Result<(ConversationState, Url), StoreError> {
        use crate::models::DecodeError;

        let fields =
            storage::with_timeout(self.store_timeout, self.store.get_all_hash_fields(raw)).await?;
        let missing = |field| DecodeError::MissingField {
            key: key.conversation_record(),
            field,
        };

        let raw_state = fields
            .get(state::STATE_FIELD)
            .ok_or_else(|| missing(state::STATE_FIELD))?;
        let raw_url = fields
            .get(state::URL_FIELD)
            .ok_or_else(|| missing(state::URL_FIELD))?;

        let conversation = ConversationState::from_store_value(raw_state)?;
        let filter = Url::parse(raw_url).map_err(|_| DecodeError::InvalidUrl {
            key: key.conversation_record(),
            url: raw_url.clone(),
        })?;
        Ok((conversation, filter))
    }
}

#[async_trait]
impl EventHandler for BotService {
    async fn handle(&self, event: Event) -> Option<OutboundMessage> {
        self.dispatch(event).await
    }
}

#[async_trait]
impl Cleaner for BotService {
    fn name(&self) -> &str {
        "bot"
    }

    async fn clean(&self) {
        BotService::clean(self).await;
    }
}

#[async_trait]
impl ShutdownTarget for BotService {
    fn name(&self) -> &str {
        "bot"
    }

    async fn shutdown(&self) -> crate::error::Result<()> {
        tracing::info!("Shutting down bot service");
        self.cancel.cancel();
        Ok(())
    }
}
