//! Messaging transport
//!
//! Inbound traffic arrives as [`Event`]s, outbound replies and notifications
//! leave through the [`Outbox`]. The concrete platform is Telegram
//! ([`telegram::TelegramClient`]); the rest of the crate only sees the types here.

pub mod outbox;
pub mod telegram;

pub use outbox::{run_sender, Outbox, OutboxNotifier};
pub use telegram::TelegramClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{ChatId, SubscriberKey};

/// Errors talking to the messaging platform
#[derive(Debug, Error)]
pub enum TransportError {
    /// Request never produced a response
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Platform answered with an error
    #[error("API error {code}: {description}")]
    Api {
        code: u16,
        description: String,
        retry_after: Option<u64>,
    },

    /// Response body did not match the expected shape
    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Outbound queue is gone
    #[error("Outbound queue closed")]
    Closed,
}

impl TransportError {
    /// Rate limiting and server-side failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Api { code, .. } => *code == 429 || *code >= 500,
            Self::Decode(_) | Self::Closed => false,
        }
    }
}

/// Membership status of the bot in a chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberStatus {
    /// Blocked by the user or banned from the group
    Kicked,
    /// Removed from the group
    Left,
    /// Added to the group
    Member,
    Other(String),
}

impl MemberStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "kicked" => Self::Kicked,
            "left" => Self::Left,
            "member" => Self::Member,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Inbound event, already keyed by the user it concerns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Text message from a user
    Command { key: SubscriberKey, text: String },

    /// A user other than the bot left the chat
    MemberLeft { key: SubscriberKey },

    /// The bot's own membership changed; `key` names who changed it
    BotStatusChanged {
        key: SubscriberKey,
        status: MemberStatus,
    },
}

impl Event {
    pub fn key(&self) -> &SubscriberKey {
        match self {
            Self::Command { key, .. } | Self::MemberLeft { key } | Self::BotStatusChanged { key, .. } => {
                key
            }
        }
    }
}

/// One text message to deliver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub chat_id: ChatId,
    pub text: String,
}

impl OutboundMessage {
    pub fn new(chat_id: ChatId, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
        }
    }
}

/// Delivers one message to the platform
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError>;
}

/// Turns an inbound event into at most one reply
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event) -> Option<OutboundMessage>;
}
