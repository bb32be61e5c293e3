//! Durable key/hash/set store
//!
//! The scanner and the bot mirror their in-memory state into a store that only
//! needs hashes, sets and cursor-based key scans. Memory stays authoritative;
//! the store is read back at startup and written best-effort afterwards.
//!
//! - [`RedisStore`] - production backend on a `deadpool-redis` pool
//! - [`MemoryStore`] - in-process backend for tests and local runs
//! - [`Persister`] - bounded background writer used on hot paths

pub mod memory;
pub mod persister;
pub mod redis_store;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub use self::memory::MemoryStore;
pub use self::persister::Persister;
pub use self::redis_store::{RedisStore, StoreConfig};

use crate::models::DecodeError;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to the store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Could not obtain a pooled connection
    #[error("Store connection unavailable: {0}")]
    Pool(String),

    /// Command failed on the server
    #[error("Store command failed: {0}")]
    Command(#[from] redis::RedisError),

    /// Operation did not finish within its budget
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    /// Stored data could not be decoded
    #[error("Corrupt record: {0}")]
    Decode(#[from] DecodeError),
}

/// Redis key types accepted by [`Store::scan_keys`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Hash,
    Set,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hash => "hash",
            Self::Set => "set",
        }
    }
}

/// Key/hash/set store contract
#[async_trait]
pub trait Store: Send + Sync {
    /// Set one field of a hash
    async fn set_hash_field(&self, key: &str, field: &str, value: &str) -> StoreResult<()>;

    /// Read every field of a hash; a missing key yields an empty map
    async fn get_all_hash_fields(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    /// Delete a key of any type
    async fn delete_key(&self, key: &str) -> StoreResult<()>;

    /// Add members to a set
    async fn add_set_members(&self, key: &str, members: &[String]) -> StoreResult<()>;

    /// Remove members from a set
    async fn remove_set_members(&self, key: &str, members: &[String]) -> StoreResult<()>;

    /// Read every member of a set; a missing key yields an empty list
    async fn get_set_members(&self, key: &str) -> StoreResult<Vec<String>>;

    /// One step of a cursor scan; iteration ends when the returned cursor is 0
    async fn scan_keys(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
        key_type: KeyType,
    ) -> StoreResult<(Vec<String>, u64)>;
}

/// Shared handle to a store
pub type SharedStore = Arc<dyn Store>;

/// Run a store future under its own time budget
pub async fn with_timeout<T, F>(budget: Duration, fut: F) -> StoreResult<T>
where
    F: std::future::Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(budget)),
    }
}

/// Iterate a cursor scan to completion and collect every key
pub async fn scan_all(
    store: &dyn Store,
    pattern: &str,
    count: usize,
    key_type: KeyType,
) -> StoreResult<Vec<String>> {
    let mut keys = Vec::new();
    let mut cursor = 0;
    loop {
        let (batch, next) = store.scan_keys(cursor, pattern, count, key_type).await?;
        keys.extend(batch);
        if next == 0 {
            break;
        }
        cursor = next;
    }
    Ok(keys)
}

/// Shutdown target flushing the persister and closing the store
pub struct StoreShutdown {
    persister: Persister,
    redis: Option<Arc<RedisStore>>,
}

impl StoreShutdown {
    pub fn new(persister: Persister, redis: Option<Arc<RedisStore>>) -> Self {
        Self { persister, redis }
    }
}

#[async_trait]
impl crate::lifecycle::ShutdownTarget for StoreShutdown {
    fn name(&self) -> &str {
        "store"
    }

    async fn shutdown(&self) -> crate::error::Result<()> {
        self.persister.drain(self.persister.timeout()).await;
        if let Some(redis) = &self.redis {
            redis.close();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result: StoreResult<()> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(StoreError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_store_shutdown_flushes_writes() {
        use crate::lifecycle::ShutdownTarget;
        use futures::FutureExt;

        let store = Arc::new(MemoryStore::new());
        let persister = Persister::new(Duration::from_secs(5));
        let writer = store.clone();
        persister.spawn(
            "hset",
            "bot;usr:a;chat:1".to_string(),
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                writer.set_hash_field("bot;usr:a;chat:1", "state", "1").await
            }
            .boxed(),
        );

        StoreShutdown::new(persister.clone(), None)
            .shutdown()
            .await
            .unwrap();
        assert!(store.contains_key("bot;usr:a;chat:1"));
        assert_eq!(persister.pending(), 0);
    }

    #[tokio::test]
    async fn test_scan_all_follows_cursor() {
        let store = MemoryStore::new();
        for i in 0..25 {
            store
                .set_hash_field(&format!("bot;usr:u{i};chat:1"), "state", "1")
                .await
                .unwrap();
        }
        store
            .add_set_members("scan;usr:u0;chat:1", &["x".to_string()])
            .await
            .unwrap();

        let keys = scan_all(&store, "bot;usr:*;chat:*", 10, KeyType::Hash)
            .await
            .unwrap();
        assert_eq!(keys.len(), 25);
    }
}
