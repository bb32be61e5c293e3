//! Scan orchestrator errors

use crate::models::SubscriberKey;

/// Errors returned by subscription lifecycle calls
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    /// No subscription is registered for the key
    #[error("scanner does not exist for {0}")]
    NotFound(SubscriberKey),

    /// A subscription is already registered for the key
    #[error("scanner already exists for {0}")]
    AlreadyExists(SubscriberKey),

    /// The subscription's engine has already been started
    #[error("scanner already running for {0}")]
    AlreadyRunning(SubscriberKey),
}

impl ScanError {
    pub fn key(&self) -> &SubscriberKey {
        match self {
            Self::NotFound(key) | Self::AlreadyExists(key) | Self::AlreadyRunning(key) => key,
        }
    }
}
