// Core data structures shared by the scanner and the bot

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Prefix of conversation records in the durable store
pub const CONVERSATION_PREFIX: &str = "bot";

/// Prefix of dedup records in the durable store
pub const DEDUP_PREFIX: &str = "scan";

/// Malformed key or record data read back from the store
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unsupported key data {0:?}")]
    UnsupportedKey(String),

    #[error("unsupported state data {0:?}")]
    UnsupportedState(String),

    #[error("record {key} is missing field {field}")]
    MissingField { key: String, field: &'static str },

    #[error("record {key} holds an invalid url {url:?}")]
    InvalidUrl { key: String, url: String },
}

/// Chat identifier as assigned by the messaging platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chat:{}", self.0)
    }
}

/// Identity of one conversation: who, and in which chat
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriberKey {
    pub username: String,
    pub chat_id: ChatId,
}

impl SubscriberKey {
    pub fn new(username: impl Into<String>, chat_id: i64) -> Self {
        Self {
            username: username.into(),
            chat_id: ChatId(chat_id),
        }
    }

    /// Store key of this subscriber's conversation record
    pub fn conversation_record(&self) -> String {
        format!("{CONVERSATION_PREFIX};{self}")
    }

    /// Store key of this subscriber's dedup record
    pub fn dedup_record(&self) -> String {
        format!("{DEDUP_PREFIX};{self}")
    }

    /// Parse a prefixed record key such as `bot;usr:alice;chat:42`
    pub fn from_record(prefix: &str, raw: &str) -> Result<Self, DecodeError> {
        let unsupported = || DecodeError::UnsupportedKey(raw.to_string());

        let fields: Vec<&str> = raw.split(';').collect();
        if fields.len() != 3 || fields[0] != prefix {
            return Err(unsupported());
        }
        fields[1..].join(";").parse().map_err(|_| unsupported())
    }
}

impl fmt::Display for SubscriberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "usr:{};{}", self.username, self.chat_id)
    }
}

impl FromStr for SubscriberKey {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unsupported = || DecodeError::UnsupportedKey(s.to_string());

        let (user, chat) = s.split_once(';').ok_or_else(unsupported)?;
        let username = user.strip_prefix("usr:").ok_or_else(unsupported)?;
        let chat_id = chat
            .strip_prefix("chat:")
            .and_then(|id| id.parse::<i64>().ok())
            .ok_or_else(unsupported)?;

        Ok(Self::new(username, chat_id))
    }
}

/// Per-subscriber conversation state; absence means "never interacted"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ConversationState {
    #[default]
    Default,
    Subscribed,
}

impl ConversationState {
    /// Value written to the `state` hash field
    pub fn as_store_value(&self) -> &'static str {
        match self {
            Self::Default => "0",
            Self::Subscribed => "1",
        }
    }

    /// Decode a stored `state` field; also accepts the raw single-byte form
    pub fn from_store_value(raw: &str) -> Result<Self, DecodeError> {
        match raw {
            "0" | "\u{0}" => Ok(Self::Default),
            "1" | "\u{1}" => Ok(Self::Subscribed),
            other => Err(DecodeError::UnsupportedState(other.to_string())),
        }
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "Default"),
            Self::Subscribed => write!(f, "Subscribed"),
        }
    }
}

/// One listing seen on a page, stamped with the day it was observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredItem {
    pub id: String,
    pub observed_on: DateTime<FixedOffset>,
}

impl DiscoveredItem {
    pub fn new(id: impl Into<String>, observed_on: DateTime<FixedOffset>) -> Self {
        Self {
            id: id.into(),
            observed_on,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display() {
        let key = SubscriberKey::new("alice", -100_123);
        assert_eq!(key.to_string(), "usr:alice;chat:-100123");
        assert_eq!(key.conversation_record(), "bot;usr:alice;chat:-100123");
        assert_eq!(key.dedup_record(), "scan;usr:alice;chat:-100123");
    }

    #[test]
    fn test_key_from_record() {
        let key = SubscriberKey::from_record("bot", "bot;usr:bob;chat:42").unwrap();
        assert_eq!(key, SubscriberKey::new("bob", 42));

        assert!(SubscriberKey::from_record("bot", "scan;usr:bob;chat:42").is_err());
        assert!(SubscriberKey::from_record("bot", "bot;usr:bob").is_err());
        assert!(SubscriberKey::from_record("bot", "bot;usr:bob;chat:x").is_err());
        assert!(SubscriberKey::from_record("bot", "bot;user:bob;chat:1").is_err());
    }

    #[test]
    fn test_state_store_values() {
        assert_eq!(ConversationState::Subscribed.as_store_value(), "1");
        assert_eq!(
            ConversationState::from_store_value("1").unwrap(),
            ConversationState::Subscribed
        );
        assert_eq!(
            ConversationState::from_store_value("\u{1}").unwrap(),
            ConversationState::Subscribed
        );
        assert_eq!(
            ConversationState::from_store_value("0").unwrap(),
            ConversationState::Default
        );
        assert!(ConversationState::from_store_value("2").is_err());
        assert!(ConversationState::from_store_value("").is_err());
    }
}
