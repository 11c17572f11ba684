//! Cache-aside reads
//!
//! Packages the lookup / load / store sequence every read path repeats:
//! check the policy, try the cache, fall back to the loader, store the
//! result with the domain TTL. The loader is the authoritative source; its
//! errors are returned to the caller. Cache problems never are.

use crate::client::{CacheClient, CacheOutcome};
use crate::keys::Domain;
use crate::policy::PolicyTable;
use medcrm_core::AppResult;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Policy-aware cache-aside helper
#[derive(Clone)]
pub struct TenantCache {
    client: Arc<CacheClient>,
    policies: Arc<PolicyTable>,
}

impl TenantCache {
    pub fn new(client: Arc<CacheClient>, policies: Arc<PolicyTable>) -> Self {
        Self { client, policies }
    }

    /// Return the cached value for `key`, or load and cache it
    ///
    /// When caching is disabled for `domain` (or globally) the loader runs
    /// every time and nothing is stored.
    #[instrument(skip(self, loader))]
    pub async fn fetch<T, F, Fut>(&self, domain: Domain, key: &str, loader: F) -> AppResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let enabled = self.policies.is_enabled(domain);
        if enabled {
            if let Some(value) = self.cached(key).await {
                return Ok(value);
            }
        } else {
            debug!("Caching disabled for {}, loading {}", domain, key);
        }

        let value = loader().await?;

        if enabled {
            self.remember(domain, key, &value).await;
        }
        Ok(value)
    }

    /// Like [`fetch`](Self::fetch) for lookups that may find nothing
    ///
    /// Only `Some` results are cached, so a record created later is not
    /// hidden behind a cached absence.
    #[instrument(skip(self, loader))]
    pub async fn fetch_optional<T, F, Fut>(
        &self,
        domain: Domain,
        key: &str,
        loader: F,
    ) -> AppResult<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<Option<T>>>,
    {
        let enabled = self.policies.is_enabled(domain);
        if enabled {
            if let Some(value) = self.cached(key).await {
                return Ok(Some(value));
            }
        }

        let value = loader().await?;

        if enabled {
            if let Some(ref v) = value {
                self.remember(domain, key, v).await;
            }
        }
        Ok(value)
    }

    async fn cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.client.lookup::<T>(key).await {
            CacheOutcome::Hit(value) => Some(value),
            CacheOutcome::Error(reason) => {
                // Overwritten by the reload below
                warn!("Ignoring unreadable cache entry {}: {}", key, reason);
                None
            }
            CacheOutcome::Miss | CacheOutcome::Unavailable => None,
        }
    }

    async fn remember<T: Serialize>(&self, domain: Domain, key: &str, value: &T) {
        if !self.client.set(key, value, self.policies.ttl(domain)).await {
            debug!("Loaded {} without caching it", key);
        }
    }

    pub fn client(&self) -> &CacheClient {
        &self.client
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryBackend;
    use crate::client::ClientSettings;
    use crate::keys::{contact_key, settings_key, ClinicId};
    use medcrm_core::AppError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn setup(global_enabled: bool) -> (TenantCache, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let client = Arc::new(CacheClient::new(backend.clone(), ClientSettings::default()));
        client.connect().await;
        let cache = TenantCache::new(client, Arc::new(PolicyTable::with_defaults(global_enabled)));
        (cache, backend)
    }

    fn clinic() -> ClinicId {
        ClinicId::new(8).unwrap()
    }

    #[tokio::test]
    async fn test_second_fetch_served_from_cache() {
        let (cache, _backend) = setup(true).await;
        let loads = AtomicUsize::new(0);
        let key = settings_key(clinic());

        for _ in 0..3 {
            let value: Vec<String> = cache
                .fetch(Domain::Settings, &key, || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(vec!["whatsapp".to_string()])
                })
                .await
                .unwrap();
            assert_eq!(value, vec!["whatsapp"]);
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.client().stats().hits, 2);
    }

    #[tokio::test]
    async fn test_kill_switch_bypasses_cache() {
        let (cache, backend) = setup(false).await;
        let loads = AtomicUsize::new(0);
        let key = settings_key(clinic());

        for _ in 0..2 {
            cache
                .fetch(Domain::Settings, &key, || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(1u32)
                })
                .await
                .unwrap();
        }

        assert_eq!(loads.load(Ordering::SeqCst), 2);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_loader_error_propagates() {
        let (cache, backend) = setup(true).await;

        let result: AppResult<u32> = cache
            .fetch(Domain::Contacts, &contact_key(clinic(), 1), || async {
                Err(AppError::NotFound("contact 1".to_string()))
            })
            .await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_outage_falls_through_to_loader() {
        let (cache, backend) = setup(true).await;
        backend.set_offline(true);

        let value = cache
            .fetch(Domain::Contacts, &contact_key(clinic(), 2), || async { Ok(42u32) })
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_fetch_optional_does_not_cache_absence() {
        let (cache, backend) = setup(true).await;
        let key = contact_key(clinic(), 3);

        let missing: Option<u32> = cache
            .fetch_optional(Domain::Contacts, &key, || async { Ok(None) })
            .await
            .unwrap();
        assert_eq!(missing, None);
        assert!(backend.is_empty());

        let found = cache
            .fetch_optional(Domain::Contacts, &key, || async { Ok(Some(3u32)) })
            .await
            .unwrap();
        assert_eq!(found, Some(3));
        assert_eq!(backend.keys(), vec![key]);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_replaced() {
        use medcrm_core::traits::CacheBackend;

        let (cache, backend) = setup(true).await;
        let key = contact_key(clinic(), 4);
        backend.set_raw(&key, "not json".to_string(), 60).await.unwrap();

        let value = cache
            .fetch(Domain::Contacts, &key, || async { Ok(4u32) })
            .await
            .unwrap();
        assert_eq!(value, 4);
        assert_eq!(backend.get_raw(&key).await.unwrap(), Some("4".to_string()));
    }
}
