//! Redis backend
//!
//! Wraps a Redis `ConnectionManager` for multiplexed access from every
//! request task. The manager reconnects on its own after a dropped
//! connection; `connect` is only needed for the first connection or when
//! the initial attempt failed.

use async_trait::async_trait;
use medcrm_core::config::RedisConfig;
use medcrm_core::traits::CacheBackend;
use medcrm_core::{AppError, AppResult};
use parking_lot::RwLock;
use redis::{aio::ConnectionManager, AsyncCommands, Client, IntoConnectionInfo, RedisError};
use tracing::{debug, error, warn};

/// Redis-backed cache store
pub struct RedisBackend {
    client: Client,
    manager: RwLock<Option<ConnectionManager>>,
    scan_count: usize,
}

impl RedisBackend {
    /// Create a backend from configuration without connecting
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the URL cannot be parsed
    pub fn new(config: &RedisConfig) -> AppResult<Self> {
        let mut info = config.url.as_str().into_connection_info().map_err(|e| {
            error!("Invalid Redis URL: {}", e);
            AppError::Config(format!("Invalid Redis URL: {}", e))
        })?;

        if let Some(db) = config.database {
            info.redis.db = db;
        }

        let client = Client::open(info).map_err(|e| {
            error!("Failed to create Redis client: {}", e);
            AppError::Config(format!("Invalid Redis connection info: {}", e))
        })?;

        Ok(Self {
            client,
            manager: RwLock::new(None),
            scan_count: config.scan_count.max(1),
        })
    }

    fn connection(&self) -> AppResult<ConnectionManager> {
        self.manager
            .read()
            .clone()
            .ok_or_else(|| AppError::CacheConnection("not connected".to_string()))
    }

    /// Convert RedisError to AppError
    fn map_redis_error(err: RedisError) -> AppError {
        if err.is_io_error()
            || err.is_timeout()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
        {
            warn!("Redis connection error: {}", err);
            return AppError::CacheConnection(err.to_string());
        }

        match err.kind() {
            redis::ErrorKind::TypeError => {
                warn!("Redis type error: {}", err);
                AppError::Cache(format!("Type mismatch: {}", err))
            }
            _ => {
                error!("Redis error: {}", err);
                AppError::Cache(err.to_string())
            }
        }
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn connect(&self) -> Result<(), AppError> {
        debug!("Connecting to Redis");

        let manager = ConnectionManager::new(self.client.clone())
            .await
            .map_err(|e| {
                error!("Failed to establish Redis connection: {}", e);
                AppError::CacheConnection(format!("Connection failed: {}", e))
            })?;

        *self.manager.write() = Some(manager);
        debug!("Redis connection established successfully");
        Ok(())
    }

    async fn disconnect(&self) {
        if self.manager.write().take().is_some() {
            debug!("Redis connection released");
        }
    }

    async fn ping(&self) -> Result<(), AppError> {
        let mut conn = self.connection()?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_redis_error)?;
        Ok(())
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>, AppError> {
        debug!("GET {}", key);
        let mut conn = self.connection()?;

        let result: Option<String> = conn.get(key).await.map_err(Self::map_redis_error)?;
        Ok(result)
    }

    async fn set_raw(&self, key: &str, payload: String, ttl_secs: u64) -> Result<(), AppError> {
        debug!("SET {} (TTL: {}s)", key, ttl_secs);
        let mut conn = self.connection()?;

        let _: () = conn
            .set_ex(key, payload, ttl_secs)
            .await
            .map_err(Self::map_redis_error)?;

        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, AppError> {
        if keys.is_empty() {
            return Ok(0);
        }
        debug!("DEL {} key(s)", keys.len());
        let mut conn = self.connection()?;

        let mut deleted = 0u64;
        for chunk in keys.chunks(self.scan_count) {
            let removed: u64 = redis::cmd("DEL")
                .arg(chunk)
                .query_async(&mut conn)
                .await
                .map_err(Self::map_redis_error)?;
            deleted += removed;
        }

        Ok(deleted)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, AppError> {
        debug!("SCAN MATCH {}", pattern);
        let mut conn = self.connection()?;

        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(self.scan_count)
                .query_async(&mut conn)
                .await
                .map_err(Self::map_redis_error)?;

            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once while the keyspace is rehashing
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }
}
