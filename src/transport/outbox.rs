//! Outbound FIFO buffer
//!
//! [`Outbox::enqueue`] waits for room when the buffer is full, so nothing is
//! lost while the send loop is alive. A single [`run_sender`] loop delivers
//! messages in order and naps for the send delay whenever the buffer is empty.
//! Once the loop has stopped, enqueued messages are dropped with a warning.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError};

use super::{MessageSender, OutboundMessage};
use crate::bot::messages;
use crate::lifecycle::Cancel;
use crate::models::SubscriberKey;
use crate::scanner::Notifier;

/// Default buffer capacity
pub const DEFAULT_BUFFER: usize = 10;

/// Default nap of the send loop when idle
pub const DEFAULT_SEND_DELAY: Duration = Duration::from_secs(5);

/// Producer side of the outbound buffer
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::Sender<OutboundMessage>,
}

impl Outbox {
    /// Create a buffer holding up to `capacity` messages
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue a message, waiting while the buffer is full
    ///
    /// Returns false if the send loop is gone and the message was dropped.
    pub async fn enqueue(&self, message: OutboundMessage) -> bool {
        match self.tx.send(message).await {
            Ok(()) => true,
            Err(mpsc::error::SendError(message)) => {
                tracing::warn!(chat_id = message.chat_id.0, "Outbound buffer closed, message dropped");
                false
            }
        }
    }
}

/// Deliver queued messages until cancelled or every producer is gone
pub async fn run_sender(
    mut rx: mpsc::Receiver<OutboundMessage>,
    sender: Arc<dyn MessageSender>,
    delay: Duration,
    cancel: Cancel,
) {
    tracing::info!(delay_ms = delay.as_millis() as u64, "Outbound loop started");

    while !cancel.is_cancelled() {
        match rx.try_recv() {
            Ok(message) => {
                if let Err(e) = sender.send(&message).await {
                    tracing::warn!(chat_id = message.chat_id.0, error = %e, "Failed to send message");
                }
            }
            Err(TryRecvError::Empty) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => break,
                }
            }
            Err(TryRecvError::Disconnected) => break,
        }
    }

    tracing::info!("Outbound loop stopped");
}

/// Turns newly discovered listings into chat messages
pub struct OutboxNotifier {
    outbox: Outbox,
    target_host: String,
}

impl OutboxNotifier {
    pub fn new(outbox: Outbox, target_host: impl Into<String>) -> Self {
        Self {
            outbox,
            target_host: target_host.into(),
        }
    }
}

#[async_trait]
impl Notifier for OutboxNotifier {
    async fn notify(&self, key: &SubscriberKey, item_id: &str) {
        let text = messages::notification(&key.username, &self.target_host, item_id);
        self.outbox.enqueue(OutboundMessage::new(key.chat_id, text)).await;
    }
}
