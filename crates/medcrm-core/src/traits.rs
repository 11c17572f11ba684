//! Common traits for cache backends
//!
//! Defines the abstraction the cache client drives. Implementations report
//! failures as `AppError`; deciding what a failure means for callers is the
//! client's job, not the backend's.

use crate::error::AppError;
use async_trait::async_trait;

/// Raw key-value store operations
///
/// Values cross this boundary already serialized, so a backend never needs
/// to know about the cached types.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short name used in logs and status reports
    fn name(&self) -> &'static str;

    /// Establish (or re-establish) the connection
    async fn connect(&self) -> Result<(), AppError>;

    /// Drop the connection
    async fn disconnect(&self);

    /// Round-trip check against the store
    async fn ping(&self) -> Result<(), AppError>;

    /// Get the raw payload stored under a key
    async fn get_raw(&self, key: &str) -> Result<Option<String>, AppError>;

    /// Store a raw payload with a TTL in seconds
    async fn set_raw(&self, key: &str, payload: String, ttl_secs: u64) -> Result<(), AppError>;

    /// Delete keys, returning how many existed
    async fn delete(&self, keys: &[String]) -> Result<u64, AppError>;

    /// List keys matching a glob pattern
    async fn scan(&self, pattern: &str) -> Result<Vec<String>, AppError>;
}
