//! Telegram Bot API client
//!
//! Only the handful of methods the bot needs: `getMe`, `setMyCommands`,
//! `getUpdates` (long polling) and `sendMessage`. Sends are paced with a
//! `governor` limiter and retried on rate limiting and server errors.

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use super::{Event, EventHandler, MemberStatus, MessageSender, OutboundMessage, Outbox, TransportError};
use crate::lifecycle::Cancel;
use crate::models::SubscriberKey;
use crate::utils::retry::{with_retry_if, RetryConfig};

/// Public Bot API endpoint
pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Default long-poll timeout of `getUpdates`
pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default cap on outgoing messages per second
pub const DEFAULT_SENDS_PER_SECOND: u32 = 25;

/// Pause after a failed `getUpdates` call
const POLL_RETRY_PAUSE: Duration = Duration::from_secs(3);

/// Slack added on top of the long-poll timeout for the HTTP request itself
const POLL_REQUEST_SLACK: Duration = Duration::from_secs(10);

/// Timeout of every other request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Envelope of every Bot API response
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<u16>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    pub username: Option<String>,
}

impl User {
    fn handle(&self) -> String {
        self.username.clone().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
    pub left_chat_member: Option<User>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMember {
    pub status: String,
    pub user: User,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMemberUpdated {
    pub chat: Chat,
    pub from: User,
    pub new_chat_member: ChatMember,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub my_chat_member: Option<ChatMemberUpdated>,
}

#[derive(Debug, Serialize)]
struct BotCommand<'a> {
    command: &'a str,
    description: &'a str,
}

#[derive(Debug, Serialize)]
struct SetMyCommands<'a> {
    commands: Vec<BotCommand<'a>>,
}

#[derive(Debug, Serialize)]
struct GetUpdates<'a> {
    offset: i64,
    timeout: u64,
    allowed_updates: &'a [&'a str],
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}

/// Bot API client
pub struct TelegramClient {
    client: Client,
    base_url: String,
    update_timeout: Duration,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    retry: RetryConfig,
}

impl TelegramClient {
    /// Create a client for `token` against `api_url`
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Http` if the HTTP client cannot be created
    pub fn new(
        api_url: &str,
        token: &str,
        update_timeout: Duration,
        sends_per_second: u32,
    ) -> Result<Self, TransportError> {
        let client = Client::builder().gzip(true).build()?;
        let rate = NonZeroU32::new(sends_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            client,
            base_url: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
            update_timeout,
            limiter: RateLimiter::direct(Quota::per_second(rate)),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Identity of the bot behind the token
    pub async fn get_me(&self) -> Result<User, TransportError> {
        self.call("getMe", &serde_json::json!({}), REQUEST_TIMEOUT).await
    }

    /// Publish the command menu (`/start`, `/stop`)
    pub async fn set_my_commands(&self) -> Result<(), TransportError> {
        let params = SetMyCommands {
            commands: vec![
                BotCommand {
                    command: "start",
                    description: "start bot",
                },
                BotCommand {
                    command: "stop",
                    description: "stop notifications",
                },
            ],
        };
        let _: bool = self.call("setMyCommands", &params, REQUEST_TIMEOUT).await?;
        Ok(())
    }

    /// Long-poll for updates with id >= `offset`
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, TransportError> {
        let params = GetUpdates {
            offset,
            timeout: self.update_timeout.as_secs(),
            allowed_updates: &["message", "my_chat_member"],
        };
        self.call("getUpdates", &params, self.update_timeout + POLL_REQUEST_SLACK)
            .await
    }

    /// Send one text message, waiting for the rate limiter first
    pub async fn send_message(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        self.limiter.until_ready().await;

        let params = SendMessage {
            chat_id: message.chat_id.0,
            text: &message.text,
        };
        let _: Message = with_retry_if(
            &self.retry,
            || self.call("sendMessage", &params, REQUEST_TIMEOUT),
            TransportError::is_retryable,
        )
        .await?;

        tracing::debug!(chat_id = message.chat_id.0, "Message sent");
        Ok(())
    }

    async fn call<P, R>(&self, method: &str, params: &P, timeout: Duration) -> Result<R, TransportError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .client
            .post(format!("{}/{method}", self.base_url))
            .timeout(timeout)
            .json(params)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        let envelope: ApiResponse<R> = serde_json::from_slice(&body)?;

        match envelope {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            envelope => Err(TransportError::Api {
                code: envelope.error_code.unwrap_or(status.as_u16()),
                description: envelope
                    .description
                    .unwrap_or_else(|| format!("{method} returned no result")),
                retry_after: envelope.parameters.and_then(|p| p.retry_after),
            }),
        }
    }
}

#[async_trait]
impl MessageSender for TelegramClient {
    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        self.send_message(message).await
    }
}

/// Map a raw update onto an [`Event`]; `None` for anything the bot ignores
pub fn update_to_event(update: &Update, bot_username: &str) -> Option<Event> {
    if let Some(message) = &update.message {
        let chat_id = message.chat.id;

        if let Some(left) = &message.left_chat_member {
            if left.username.as_deref() != Some(bot_username) {
                return Some(Event::MemberLeft {
                    key: SubscriberKey::new(left.handle(), chat_id),
                });
            }
        }

        let from = message.from.as_ref()?;
        let text = message.text.as_ref()?;
        return Some(Event::Command {
            key: SubscriberKey::new(from.handle(), chat_id),
            text: text.clone(),
        });
    }

    let change = update.my_chat_member.as_ref()?;
    if change.new_chat_member.user.username.as_deref() != Some(bot_username) {
        return None;
    }
    Some(Event::BotStatusChanged {
        key: SubscriberKey::new(change.from.handle(), change.chat.id),
        status: MemberStatus::parse(&change.new_chat_member.status),
    })
}

/// Long-poll updates and feed them to `handler` until cancelled
///
/// Updates are handled one at a time in arrival order; replies go to `outbox`.
pub async fn run_inbound(
    client: Arc<TelegramClient>,
    bot_username: String,
    handler: Arc<dyn EventHandler>,
    outbox: Outbox,
    cancel: Cancel,
) {
    tracing::info!(bot = %bot_username, "Inbound loop started");

    let mut offset = 0;
    loop {
        let polled = tokio::select! {
            polled = client.get_updates(offset) => polled,
            _ = cancel.cancelled() => break,
        };

        let updates = match polled {
            Ok(updates) => updates,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to poll updates");
                tokio::select! {
                    _ = tokio::time::sleep(POLL_RETRY_PAUSE) => continue,
                    _ = cancel.cancelled() => break,
                }
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);

            let Some(event) = update_to_event(&update, &bot_username) else {
                tracing::trace!(update_id = update.update_id, "Update ignored");
                continue;
            };
            if let Some(reply) = handler.handle(event).await {
                outbox.enqueue(reply).await;
            }
        }
    }

    tracing::info!("Inbound loop stopped");
}
