//! Shared application state

use medcrm_cache::{CacheClient, InvalidationDriver, PolicyTable};
use std::sync::Arc;

/// Services shared by every worker
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<CacheClient>,
    pub policies: Arc<PolicyTable>,
    pub invalidation: Arc<InvalidationDriver>,
}

impl AppState {
    pub fn new(cache: Arc<CacheClient>, policies: Arc<PolicyTable>) -> Self {
        let invalidation = Arc::new(InvalidationDriver::new(cache.clone(), policies.clone()));
        Self {
            cache,
            policies,
            invalidation,
        }
    }
}
