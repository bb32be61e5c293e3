//! Redis-backed store
//!
//! # Example
//!
//! ```rust,ignore
//! use krisha_scan::storage::{RedisStore, StoreConfig, Store};
//!
//! let config = StoreConfig::from_env();
//! let store = RedisStore::connect(&config).await?;
//! store.set_hash_field("bot;usr:alice;chat:1", "state", "1").await?;
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Connection, Pool, Runtime};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::{KeyType, Store, StoreError, StoreResult};

/// Store connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,

    /// Connection pool size
    pub pool_size: usize,

    /// Budget for a single background store call, in seconds
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            timeout_secs: 120,
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("REDIS_URL").unwrap_or(defaults.url),
            pool_size: std::env::var("REDIS_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|size| *size > 0)
                .unwrap_or(defaults.pool_size),
            timeout_secs: std::env::var("REDIS_TIMEOUT")
                .ok()
                .and_then(|s| crate::utils::parse_duration(&s).ok())
                .map(|d| d.as_secs().max(1))
                .unwrap_or(defaults.timeout_secs),
        }
    }

    /// Budget for a single background store call
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Redis store client
pub struct RedisStore {
    /// Connection pool
    pool: Pool,
}

impl RedisStore {
    /// Create a pool and verify the server answers `PING`
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let pool_config = PoolConfig::from_url(&config.url);
        let pool = pool_config
            .builder()
            .map_err(|e| anyhow::anyhow!("Failed to create pool builder: {e}"))?
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .context("Failed to create Redis connection pool")?;

        let mut conn = pool.get().await.context("Failed to get Redis connection")?;

        let _: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .context("Failed to ping Redis")?;

        tracing::info!(url = %config.url, "Connected to Redis");

        Ok(Self { pool })
    }

    /// Check if the server is reachable
    pub async fn health_check(&self) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let result: String = redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(result == "PONG")
    }

    /// Close the pool; later calls fail with a pool error
    pub fn close(&self) {
        self.pool.close();
        tracing::info!("Redis pool closed");
    }

    async fn conn(&self) -> StoreResult<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn set_hash_field(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        conn.hset::<_, _, _, ()>(key, field, value).await?;
        Ok(())
    }

    async fn get_all_hash_fields(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let mut conn = self.conn().await?;
        Ok(conn.hgetall(key).await?)
    }

    async fn delete_key(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn add_set_members(&self, key: &str, members: &[String]) -> StoreResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        conn.sadd::<_, _, ()>(key, members).await?;
        Ok(())
    }

    async fn remove_set_members(&self, key: &str, members: &[String]) -> StoreResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        conn.srem::<_, _, ()>(key, members).await?;
        Ok(())
    }

    async fn get_set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.smembers(key).await?)
    }

    async fn scan_keys(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
        key_type: KeyType,
    ) -> StoreResult<(Vec<String>, u64)> {
        let mut conn = self.conn().await?;
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .arg("TYPE")
            .arg(key_type.as_str())
            .query_async(&mut *conn)
            .await?;
        Ok((keys, next))
    }
}
