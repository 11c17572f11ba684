//! In-process backend
//!
//! A HashMap with per-entry expiry, used for local development
//! (`memory://` URL) and as the fake store in tests. It can be switched
//! offline or slowed down to exercise the client's degraded paths.

use crate::pattern::glob_match;
use async_trait::async_trait;
use medcrm_core::traits::CacheBackend;
use medcrm_core::AppError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Writes between sweeps of expired entries
const PURGE_EVERY: u64 = 64;

#[derive(Debug, Clone)]
struct Entry {
    payload: String,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-memory cache store
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Entry>>,
    writes: AtomicU64,
    offline: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the store becoming unreachable (or coming back)
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay every command, to simulate a hung store
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock();
        purge_expired(&mut entries, Instant::now());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut entries = self.entries.lock();
        purge_expired(&mut entries, Instant::now());
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort_unstable();
        keys
    }

    async fn reachable(&self) -> Result<(), AppError> {
        let latency = *self.latency.lock();
        if let Some(delay) = latency {
            tokio::time::sleep(delay).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(AppError::CacheConnection("memory backend offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self) -> Result<(), AppError> {
        self.reachable().await
    }

    async fn disconnect(&self) {}

    async fn ping(&self) -> Result<(), AppError> {
        self.reachable().await
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>, AppError> {
        self.reachable().await?;
        debug!("GET {}", key);

        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.payload.clone())),
            None => Ok(None),
        }
    }

    async fn set_raw(&self, key: &str, payload: String, ttl_secs: u64) -> Result<(), AppError> {
        self.reachable().await?;
        debug!("SET {} (TTL: {}s)", key, ttl_secs);

        let now = Instant::now();
        let expires_at = now
            .checked_add(Duration::from_secs(ttl_secs))
            .ok_or_else(|| AppError::Cache(format!("TTL of {}s is out of range", ttl_secs)))?;

        let mut entries = self.entries.lock();
        if self.writes.fetch_add(1, Ordering::Relaxed) % PURGE_EVERY == PURGE_EVERY - 1 {
            purge_expired(&mut entries, now);
        }
        entries.insert(key.to_string(), Entry { payload, expires_at });
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, AppError> {
        self.reachable().await?;
        debug!("DEL {} key(s)", keys.len());

        let now = Instant::now();
        let mut entries = self.entries.lock();
        let removed = keys
            .iter()
            .filter_map(|key| entries.remove(key))
            .filter(|entry| !entry.is_expired(now))
            .count();
        Ok(removed as u64)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, AppError> {
        self.reachable().await?;
        debug!("SCAN MATCH {}", pattern);

        Ok(self
            .keys()
            .into_iter()
            .filter(|key| glob_match(pattern, key))
            .collect())
    }
}

fn purge_expired(entries: &mut HashMap<String, Entry>, now: Instant) {
    entries.retain(|_, entry| !entry.is_expired(now));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let backend = MemoryBackend::new();
        backend
            .set_raw("clinic_1:settings", "{}".to_string(), 60)
            .await
            .unwrap();

        assert_eq!(
            backend.get_raw("clinic_1:settings").await.unwrap(),
            Some("{}".to_string())
        );
        assert_eq!(backend.delete(&["clinic_1:settings".to_string()]).await.unwrap(), 1);
        assert_eq!(backend.delete(&["clinic_1:settings".to_string()]).await.unwrap(), 0);
        assert_eq!(backend.get_raw("clinic_1:settings").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_entries_are_absent() {
        let backend = MemoryBackend::new();
        backend.set_raw("clinic_1:a", "1".to_string(), 0).await.unwrap();

        assert_eq!(backend.get_raw("clinic_1:a").await.unwrap(), None);
        assert!(backend.is_empty());
        assert!(backend.scan("*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_entries_are_reclaimed() {
        let backend = MemoryBackend::new();
        for i in 0..PURGE_EVERY * 2 {
            let key = format!("clinic_1:contacts:id:{}", i);
            backend.set_raw(&key, "1".to_string(), 0).await.unwrap();
        }
        // Writes alone keep the map bounded
        assert!(backend.entries.lock().len() < PURGE_EVERY as usize);

        backend.set_raw("clinic_1:settings", "{}".to_string(), 60).await.unwrap();
        assert_eq!(backend.scan("clinic_1:*").await.unwrap().len(), 1);
        assert_eq!(backend.entries.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_is_an_error() {
        let backend = MemoryBackend::new();
        let err = backend
            .set_raw("clinic_1:settings", "{}".to_string(), u64::MAX)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Cache(_)));
        assert!(!err.is_connection_error());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_scan_uses_glob() {
        let backend = MemoryBackend::new();
        for key in ["clinic_1:contacts:a", "clinic_1:pipeline:b", "clinic_12:contacts:a"] {
            backend.set_raw(key, "1".to_string(), 60).await.unwrap();
        }

        assert_eq!(
            backend.scan("clinic_1:*").await.unwrap(),
            vec!["clinic_1:contacts:a", "clinic_1:pipeline:b"]
        );
        assert_eq!(
            backend.scan("clinic_1*:contacts*").await.unwrap(),
            vec!["clinic_1:contacts:a", "clinic_12:contacts:a"]
        );
    }

    #[tokio::test]
    async fn test_offline() {
        let backend = MemoryBackend::new();
        backend.set_offline(true);

        let err = backend.get_raw("k").await.unwrap_err();
        assert!(err.is_connection_error());
        assert!(backend.connect().await.is_err());

        backend.set_offline(false);
        assert!(backend.ping().await.is_ok());
    }
}
