//! Best-effort cache client
//!
//! The cache is an optimization, never a dependency. Every method here
//! swallows backend failures, logs them with the key (never the value) and
//! returns a safe default, so the caller always falls through to the
//! database when the cache cannot answer.
//!
//! Internally each call resolves to a [`CacheOutcome`]. The `lookup`, `store`,
//! `remove` and `evict` methods return it for callers and tests that care
//! which branch was taken; `get`, `set`, `del` and `del_pattern` collapse it
//! to `Option`/`bool`.
//!
//! # Example
//!
//! ```
//! use medcrm_cache::backends::MemoryBackend;
//! use medcrm_cache::{CacheClient, ClientSettings};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let cache = CacheClient::new(Arc::new(MemoryBackend::new()), ClientSettings::default());
//! cache.connect().await;
//!
//! assert!(cache.set("clinic_1:settings", &vec!["whatsapp"], 60).await);
//! let value: Option<Vec<String>> = cache.get("clinic_1:settings").await;
//! assert_eq!(value, Some(vec!["whatsapp".to_string()]));
//! # }
//! ```

use crate::stats::{CacheStats, StatsSnapshot};
use chrono::{DateTime, Utc};
use medcrm_core::config::RedisConfig;
use medcrm_core::traits::CacheBackend;
use medcrm_core::{AppError, AppResult};
use parking_lot::{Mutex, RwLock};
use serde::{de::DeserializeOwned, Serialize};
use std::borrow::Cow;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Result of a single cache call
#[derive(Debug, Clone, PartialEq)]
pub enum CacheOutcome<T> {
    /// The call succeeded (for reads: the key was present and decoded)
    Hit(T),
    /// The key was absent
    Miss,
    /// The backend is down or timed out; nothing was attempted or awaited
    Unavailable,
    /// The backend answered with an error, or the payload could not be encoded/decoded
    Error(String),
}

impl<T> CacheOutcome<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            CacheOutcome::Hit(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, CacheOutcome::Hit(_))
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, CacheOutcome::Unavailable)
    }
}

/// Why a command did not produce a value
enum Degraded {
    Unavailable,
    Failed(String),
}

impl Degraded {
    fn into_outcome<T>(self) -> CacheOutcome<T> {
        match self {
            Degraded::Unavailable => CacheOutcome::Unavailable,
            Degraded::Failed(reason) => CacheOutcome::Error(reason),
        }
    }
}

/// Timeouts applied by the client
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub probe_interval: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(3),
            probe_interval: Duration::from_secs(5),
        }
    }
}

impl From<&RedisConfig> for ClientSettings {
    fn from(config: &RedisConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            command_timeout: config.command_timeout(),
            probe_interval: config.probe_interval(),
        }
    }
}

/// Snapshot of the connection state, for health checks
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub backend: &'static str,
    pub available: bool,
    pub connected_since: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct StateDetail {
    connected_since: Option<DateTime<Utc>>,
    last_error: Option<String>,
    last_error_at: Option<DateTime<Utc>>,
}

/// Availability flag plus the details reported by `status()`
#[derive(Debug)]
struct ConnectionState {
    backend: &'static str,
    available: AtomicBool,
    detail: RwLock<StateDetail>,
}

impl ConnectionState {
    fn new(backend: &'static str) -> Self {
        Self {
            backend,
            available: AtomicBool::new(false),
            detail: RwLock::new(StateDetail {
                last_error: Some("not connected".to_string()),
                ..Default::default()
            }),
        }
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    fn mark_available(&self) {
        if !self.available.swap(true, Ordering::AcqRel) {
            self.detail.write().connected_since = Some(Utc::now());
            info!("Cache backend {} available", self.backend);
        }
    }

    fn mark_unavailable(&self, reason: &str) {
        let was_available = self.available.swap(false, Ordering::AcqRel);
        {
            let mut detail = self.detail.write();
            detail.connected_since = None;
            detail.last_error = Some(reason.to_string());
            detail.last_error_at = Some(Utc::now());
        }
        if was_available {
            warn!(
                "Cache backend {} unavailable, falling back to the database: {}",
                self.backend, reason
            );
        }
    }

    fn snapshot(&self) -> ConnectionStatus {
        let detail = self.detail.read();
        ConnectionStatus {
            backend: self.backend,
            available: self.is_available(),
            connected_since: detail.connected_since,
            last_error: detail.last_error.clone(),
            last_error_at: detail.last_error_at,
        }
    }
}

/// Tenant-agnostic cache client with non-throwing degradation
///
/// Construct one per process, call [`connect`](Self::connect) at startup and
/// share it behind an `Arc`. The backend multiplexes commands, so no locking
/// happens around calls; concurrent writes to one key are last-write-wins.
pub struct CacheClient {
    backend: Arc<dyn CacheBackend>,
    state: Arc<ConnectionState>,
    stats: Arc<CacheStats>,
    settings: ClientSettings,
    probe: Mutex<Option<JoinHandle<()>>>,
}

impl CacheClient {
    /// Create a client; it stays unavailable until `connect` succeeds
    pub fn new(backend: Arc<dyn CacheBackend>, settings: ClientSettings) -> Self {
        let state = Arc::new(ConnectionState::new(backend.name()));
        Self {
            backend,
            state,
            stats: Arc::new(CacheStats::new()),
            settings,
            probe: Mutex::new(None),
        }
    }

    /// Connect to the backend and start the health probe
    ///
    /// Never fails: a backend that cannot be reached leaves the client in
    /// degraded mode and the probe keeps retrying. Returns the availability
    /// after the first attempt.
    pub async fn connect(&self) -> bool {
        let available = probe_once(self.backend.as_ref(), &self.state, &self.settings).await;
        if !available {
            warn!("Cache starting in degraded mode; reads will fall through to the database");
        }

        let backend = Arc::clone(&self.backend);
        let state = Arc::clone(&self.state);
        let settings = self.settings.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(settings.probe_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the connect attempt above covered it
            ticker.tick().await;
            loop {
                ticker.tick().await;
                probe_once(backend.as_ref(), &state, &settings).await;
            }
        });

        if let Some(previous) = self.probe.lock().replace(handle) {
            previous.abort();
        }
        available
    }

    /// Stop the probe and release the backend connection
    pub async fn close(&self) {
        if let Some(handle) = self.probe.lock().take() {
            handle.abort();
        }
        self.backend.disconnect().await;
        self.state.mark_unavailable("closed");
        debug!("Cache client closed");
    }

    /// Probe the backend now instead of waiting for the next tick
    pub async fn refresh_status(&self) -> bool {
        probe_once(self.backend.as_ref(), &self.state, &self.settings).await
    }

    pub fn is_available(&self) -> bool {
        self.state.is_available()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.snapshot()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Run one backend command under the availability check and command timeout
    async fn run<T, F>(&self, op: &'static str, key: &str, command: F) -> Result<T, Degraded>
    where
        F: Future<Output = AppResult<T>>,
    {
        if !self.state.is_available() {
            self.stats.record_unavailable();
            debug!("Cache unavailable, skipping {} {}", op, key);
            return Err(Degraded::Unavailable);
        }

        match timeout(self.settings.command_timeout, command).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) if e.is_connection_error() => {
                self.stats.record_unavailable();
                warn!("Cache {} {} failed, backend unreachable: {}", op, key, e);
                self.state.mark_unavailable(&e.to_string());
                Err(Degraded::Unavailable)
            }
            Ok(Err(e)) => {
                self.stats.record_error();
                error!("Cache {} {} failed: {}", op, key, e);
                Err(Degraded::Failed(e.to_string()))
            }
            Err(_) => {
                let err = AppError::CacheTimeout(self.settings.command_timeout.as_millis() as u64);
                self.stats.record_unavailable();
                warn!("Cache {} {} timed out", op, key);
                self.state.mark_unavailable(&err.to_string());
                Err(Degraded::Unavailable)
            }
        }
    }

    /// Look a key up, reporting which branch was taken
    ///
    /// A payload that no longer decodes as `T` yields `Error`; it never
    /// breaks the read path.
    pub async fn lookup<T: DeserializeOwned>(&self, key: &str) -> CacheOutcome<T> {
        let payload = match self.run("GET", key, self.backend.get_raw(key)).await {
            Ok(payload) => payload,
            Err(degraded) => return degraded.into_outcome(),
        };

        match payload {
            Some(json) => match serde_json::from_str::<T>(&json) {
                Ok(value) => {
                    self.stats.record_hit();
                    debug!("Cache HIT: {}", key);
                    CacheOutcome::Hit(value)
                }
                Err(e) => {
                    self.stats.record_error();
                    warn!("Failed to deserialize cached value for key {}: {}", key, e);
                    CacheOutcome::Error(format!("Deserialization failed: {}", e))
                }
            },
            None => {
                self.stats.record_miss();
                debug!("Cache MISS: {}", key);
                CacheOutcome::Miss
            }
        }
    }

    /// Get a value; `None` on miss, outage, timeout or corrupt entry
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.lookup(key).await.into_option()
    }

    /// Serialize and store a value with a TTL
    pub async fn store<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> CacheOutcome<()> {
        if ttl_secs == 0 {
            self.stats.record_error();
            warn!("Refusing to cache {} without a TTL", key);
            return CacheOutcome::Error("TTL must be positive".to_string());
        }

        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                self.stats.record_error();
                error!("Failed to serialize value for key {}: {}", key, e);
                return CacheOutcome::Error(format!("Serialization failed: {}", e));
            }
        };

        match self
            .run("SET", key, self.backend.set_raw(key, payload, ttl_secs))
            .await
        {
            Ok(()) => {
                self.stats.record_write();
                CacheOutcome::Hit(())
            }
            Err(degraded) => degraded.into_outcome(),
        }
    }

    /// Store a value; `true` on success
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl_secs: u64) -> bool {
        self.store(key, value, ttl_secs).await.is_hit()
    }

    /// Delete keys, reporting how many existed
    pub async fn remove(&self, keys: &[String]) -> CacheOutcome<u64> {
        if keys.is_empty() {
            return CacheOutcome::Hit(0);
        }

        let label = command_label(keys);
        match self.run("DEL", &label, self.backend.delete(keys)).await {
            Ok(count) => {
                self.stats.record_deletes(count);
                CacheOutcome::Hit(count)
            }
            Err(degraded) => degraded.into_outcome(),
        }
    }

    /// Delete one key; `true` when the command succeeded, whether or not the key existed
    pub async fn del(&self, key: &str) -> bool {
        self.remove(&[key.to_string()]).await.is_hit()
    }

    /// Delete several keys in one command
    pub async fn del_many(&self, keys: &[String]) -> bool {
        self.remove(keys).await.is_hit()
    }

    /// List keys matching a glob pattern
    pub async fn scan_keys(&self, pattern: &str) -> CacheOutcome<Vec<String>> {
        match self.run("SCAN", pattern, self.backend.scan(pattern)).await {
            Ok(keys) => CacheOutcome::Hit(keys),
            Err(degraded) => degraded.into_outcome(),
        }
    }

    /// Delete every key matching a glob pattern, returning how many were removed
    ///
    /// A pattern matching nothing is a successful no-op.
    pub async fn evict(&self, pattern: &str) -> CacheOutcome<u64> {
        let keys = match self.scan_keys(pattern).await {
            CacheOutcome::Hit(keys) => keys,
            CacheOutcome::Miss => Vec::new(),
            CacheOutcome::Unavailable => return CacheOutcome::Unavailable,
            CacheOutcome::Error(reason) => return CacheOutcome::Error(reason),
        };

        if keys.is_empty() {
            debug!("No keys match {}", pattern);
            return CacheOutcome::Hit(0);
        }

        let outcome = self.remove(&keys).await;
        if let CacheOutcome::Hit(count) = outcome {
            debug!("Evicted {} key(s) matching {}", count, pattern);
        }
        outcome
    }

    /// Delete every key matching a glob pattern; `true` on success
    pub async fn del_pattern(&self, pattern: &str) -> bool {
        self.evict(pattern).await.is_hit()
    }
}

impl Drop for CacheClient {
    fn drop(&mut self) {
        if let Some(handle) = self.probe.get_mut().take() {
            handle.abort();
        }
    }
}

/// Log label for a multi-key command: the key itself, or just the count
fn command_label(keys: &[String]) -> Cow<'_, str> {
    match keys {
        [key] => Cow::Borrowed(key.as_str()),
        _ => Cow::Owned(format!("{} keys", keys.len())),
    }
}

/// One health probe: ping when available, reconnect when not
async fn probe_once(
    backend: &dyn CacheBackend,
    state: &ConnectionState,
    settings: &ClientSettings,
) -> bool {
    if state.is_available() {
        match timeout(settings.command_timeout, backend.ping()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => state.mark_unavailable(&e.to_string()),
            Err(_) => state.mark_unavailable(
                &AppError::CacheTimeout(settings.command_timeout.as_millis() as u64).to_string(),
            ),
        }
        return state.is_available();
    }

    let attempt = async {
        backend.connect().await?;
        backend.ping().await
    };
    match timeout(settings.connect_timeout, attempt).await {
        Ok(Ok(())) => state.mark_available(),
        Ok(Err(e)) => {
            debug!("Cache reconnect attempt failed: {}", e);
            state.mark_unavailable(&e.to_string());
        }
        Err(_) => state.mark_unavailable(&format!(
            "connect timed out after {} ms",
            settings.connect_timeout.as_millis()
        )),
    }
    state.is_available()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryBackend;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Contact {
        id: u64,
        name: String,
        phones: Vec<String>,
    }

    fn fast_settings() -> ClientSettings {
        ClientSettings {
            connect_timeout: Duration::from_millis(200),
            command_timeout: Duration::from_millis(50),
            probe_interval: Duration::from_secs(60),
        }
    }

    async fn connected() -> (CacheClient, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let client = CacheClient::new(backend.clone(), fast_settings());
        assert!(client.connect().await);
        (client, backend)
    }

    #[tokio::test]
    async fn test_unavailable_before_connect() {
        let client = CacheClient::new(Arc::new(MemoryBackend::new()), fast_settings());
        assert!(!client.is_available());
        assert_eq!(client.lookup::<String>("k").await, CacheOutcome::Unavailable);
        assert!(!client.set("k", "v", 60).await);
        assert_eq!(client.status().last_error.as_deref(), Some("not connected"));
    }

    #[tokio::test]
    async fn test_lookup_branches() {
        let (client, backend) = connected().await;

        assert_eq!(client.lookup::<Contact>("clinic_1:contacts:id:1").await, CacheOutcome::Miss);

        let contact = Contact {
            id: 1,
            name: "Ana".to_string(),
            phones: vec!["+5491100000000".to_string()],
        };
        assert_eq!(client.store("clinic_1:contacts:id:1", &contact, 60).await, CacheOutcome::Hit(()));
        assert_eq!(
            client.lookup::<Contact>("clinic_1:contacts:id:1").await,
            CacheOutcome::Hit(contact)
        );

        backend
            .set_raw("clinic_1:contacts:id:2", "{not json".to_string(), 60)
            .await
            .unwrap();
        assert!(matches!(
            client.lookup::<Contact>("clinic_1:contacts:id:2").await,
            CacheOutcome::Error(_)
        ));
        assert_eq!(client.get::<Contact>("clinic_1:contacts:id:2").await, None);

        let stats = client.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.errors, 2);
        assert_eq!(stats.writes, 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_rejected() {
        let (client, backend) = connected().await;
        assert!(matches!(client.store("k", &1, 0).await, CacheOutcome::Error(_)));
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_is_a_command_failure() {
        let (client, backend) = connected().await;

        assert!(!client.set("clinic_1:settings", &"{}", u64::MAX).await);
        assert!(client.is_available());
        assert_eq!(client.stats().errors, 1);
        assert!(backend.is_empty());
    }

    #[test]
    fn test_command_label_stays_short() {
        assert_eq!(command_label(&["clinic_1:settings".to_string()]), "clinic_1:settings");

        let keys: Vec<String> = (0..10_000).map(|i| format!("clinic_1:contacts:id:{}", i)).collect();
        assert_eq!(command_label(&keys), "10000 keys");
    }

    #[tokio::test]
    async fn test_serialization_failure_returns_false() {
        use std::collections::HashMap;

        let (client, _backend) = connected().await;
        // JSON object keys must be strings
        let mut bad: HashMap<(u8, u8), u8> = HashMap::new();
        bad.insert((1, 2), 3);
        assert!(!client.set("clinic_1:analytics:bad", &bad, 60).await);
    }

    #[tokio::test]
    async fn test_backend_error_marks_unavailable() {
        let (client, backend) = connected().await;
        backend.set_offline(true);

        assert_eq!(client.get::<String>("k").await, None);
        assert!(!client.is_available());

        let status = client.status();
        assert!(!status.available);
        assert!(status.last_error.unwrap().contains("offline"));
        assert!(status.last_error_at.is_some());

        // Short-circuited without touching the backend
        assert_eq!(client.lookup::<String>("k").await, CacheOutcome::Unavailable);
        assert!(client.stats().unavailable >= 2);
    }

    #[tokio::test]
    async fn test_timeout_treated_as_unavailable() {
        let (client, backend) = connected().await;
        backend.set_latency(Some(Duration::from_secs(30)));

        let started = std::time::Instant::now();
        assert_eq!(client.lookup::<String>("k").await, CacheOutcome::Unavailable);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!client.is_available());
        assert!(client
            .status()
            .last_error
            .unwrap()
            .contains("timed out"));
    }

    #[tokio::test]
    async fn test_refresh_status_recovers() {
        let (client, backend) = connected().await;
        backend.set_offline(true);
        assert!(!client.refresh_status().await);

        backend.set_offline(false);
        assert!(client.refresh_status().await);
        assert!(client.status().connected_since.is_some());
        assert!(client.set("k", "v", 60).await);
    }

    #[tokio::test]
    async fn test_probe_reconnects_in_background() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_offline(true);
        let client = CacheClient::new(
            backend.clone(),
            ClientSettings {
                probe_interval: Duration::from_millis(20),
                ..fast_settings()
            },
        );
        assert!(!client.connect().await);

        backend.set_offline(false);
        let mut recovered = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if client.is_available() {
                recovered = true;
                break;
            }
        }
        assert!(recovered);
    }

    #[tokio::test]
    async fn test_evict_pattern() {
        let (client, backend) = connected().await;
        for key in ["clinic_1:contacts:a", "clinic_1:contacts:b", "clinic_2:contacts:a"] {
            assert!(client.set(key, &1, 60).await);
        }

        assert_eq!(client.evict("clinic_1:*").await, CacheOutcome::Hit(2));
        assert_eq!(client.evict("clinic_1:*").await, CacheOutcome::Hit(0));
        assert!(client.del_pattern("clinic_404:*").await);
        assert_eq!(backend.keys(), vec!["clinic_2:contacts:a"]);
        assert_eq!(client.stats().deletes, 2);
    }

    #[tokio::test]
    async fn test_del_variants() {
        let (client, backend) = connected().await;
        assert!(client.set("a", &1, 60).await);
        assert!(client.set("b", &2, 60).await);
        assert!(client.set("c", &3, 60).await);

        assert!(client.del("a").await);
        assert!(client.del("a").await);
        assert!(client.del_many(&["b".to_string(), "c".to_string()]).await);
        assert!(client.del_many(&[]).await);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_close() {
        let (client, _backend) = connected().await;
        client.close().await;
        assert!(!client.is_available());
        assert_eq!(client.status().last_error.as_deref(), Some("closed"));
        assert_eq!(client.get::<String>("k").await, None);
    }
}
