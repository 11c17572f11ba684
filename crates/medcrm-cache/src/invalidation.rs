//! Invalidation driver
//!
//! Glue between mutating operations and the cache: the caller reports what
//! happened (`appointments`/`reschedule` for clinic 5) and the driver asks
//! the policy table whether and how widely to evict.

use crate::client::{CacheClient, CacheOutcome};
use crate::keys::{
    belongs_to_tenant, build_domain_pattern, permissions_key, session_key, tenant_patterns,
    ClinicId, Domain,
};
use crate::policy::PolicyTable;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Extra patterns accepted per invalidation; the rest are rejected
pub const MAX_EXTRA_PATTERNS: usize = 16;

/// How much of the cache an invalidation touched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationScope {
    /// One domain within a clinic
    Domain,
    /// Every key of a clinic
    Tenant,
    /// Session and permission keys of one user
    User,
    /// The operation does not invalidate the domain; nothing was evicted
    Skipped,
}

/// What an invalidation did
#[derive(Debug, Clone, Serialize)]
pub struct InvalidationReport {
    pub domain: Option<Domain>,
    pub operation: String,
    pub clinic_id: Option<u64>,
    pub user_id: Option<u64>,
    pub scope: InvalidationScope,
    /// Patterns (or exact keys) evicted
    pub patterns: Vec<String>,
    /// Extra patterns refused because they reach outside the clinic
    pub rejected: Vec<String>,
    pub keys_removed: u64,
    /// False when any eviction hit an unavailable or failing backend
    pub complete: bool,
}

impl InvalidationReport {
    fn new(operation: &str, scope: InvalidationScope) -> Self {
        Self {
            domain: None,
            operation: operation.to_string(),
            clinic_id: None,
            user_id: None,
            scope,
            patterns: Vec::new(),
            rejected: Vec::new(),
            keys_removed: 0,
            complete: true,
        }
    }

    fn absorb(&mut self, outcomes: Vec<CacheOutcome<u64>>) {
        for outcome in outcomes {
            match outcome {
                CacheOutcome::Hit(count) => self.keys_removed += count,
                CacheOutcome::Miss => {}
                CacheOutcome::Unavailable | CacheOutcome::Error(_) => self.complete = false,
            }
        }
    }
}

/// Evicts cached data after mutations
pub struct InvalidationDriver {
    client: Arc<CacheClient>,
    policies: Arc<PolicyTable>,
}

impl InvalidationDriver {
    pub fn new(client: Arc<CacheClient>, policies: Arc<PolicyTable>) -> Self {
        Self { client, policies }
    }

    /// Invalidate after `operation` on `domain` in `clinic`
    ///
    /// Evicts the domain pattern, or the whole clinic when the policy lists
    /// the operation under `evict_tenant_on`. Extra patterns are evicted
    /// alongside, but only those that stay inside the clinic (or address
    /// user-scoped keys), up to [`MAX_EXTRA_PATTERNS`] of them. Safe to
    /// repeat: a second call removes nothing.
    #[instrument(skip(self, extra_patterns), fields(clinic = %clinic))]
    pub async fn invalidate(
        &self,
        domain: Domain,
        operation: &str,
        clinic: ClinicId,
        extra_patterns: &[String],
    ) -> InvalidationReport {
        if !self.policies.should_invalidate(domain, operation) {
            debug!("{} does not invalidate {}", operation, domain);
            let mut report = InvalidationReport::new(operation, InvalidationScope::Skipped);
            report.domain = Some(domain);
            report.clinic_id = Some(clinic.get());
            return report;
        }

        let (scope, primary) = if self.policies.evicts_tenant(domain, operation) {
            (InvalidationScope::Tenant, tenant_patterns(clinic))
        } else {
            (
                InvalidationScope::Domain,
                vec![build_domain_pattern(clinic, domain)],
            )
        };

        let mut report = InvalidationReport::new(operation, scope);
        report.domain = Some(domain);
        report.clinic_id = Some(clinic.get());
        report.patterns = primary;

        if extra_patterns.len() > MAX_EXTRA_PATTERNS {
            warn!(
                "Refusing {} extra pattern(s) beyond the limit of {}",
                extra_patterns.len() - MAX_EXTRA_PATTERNS,
                MAX_EXTRA_PATTERNS
            );
            report
                .rejected
                .extend_from_slice(&extra_patterns[MAX_EXTRA_PATTERNS..]);
        }

        for pattern in extra_patterns.iter().take(MAX_EXTRA_PATTERNS) {
            if belongs_to_tenant(pattern, clinic) {
                if !report.patterns.contains(pattern) {
                    report.patterns.push(pattern.clone());
                }
            } else {
                warn!(
                    "Refusing to evict {} on behalf of clinic {}: pattern is outside the clinic",
                    pattern, clinic
                );
                report.rejected.push(pattern.clone());
            }
        }

        let outcomes = join_all(report.patterns.iter().map(|p| self.client.evict(p))).await;
        report.absorb(outcomes);

        info!(
            "Invalidated {} after {} for clinic {}: {} key(s) removed{}",
            domain,
            operation,
            clinic,
            report.keys_removed,
            if report.complete { "" } else { " (incomplete)" }
        );
        report
    }

    /// Evict every key of a clinic, legacy `tenant_{id}:` keys included
    #[instrument(skip(self), fields(clinic = %clinic))]
    pub async fn evict_tenant(&self, clinic: ClinicId) -> InvalidationReport {
        let mut report = InvalidationReport::new("evict_tenant", InvalidationScope::Tenant);
        report.clinic_id = Some(clinic.get());
        report.patterns = tenant_patterns(clinic);

        let outcomes = join_all(report.patterns.iter().map(|p| self.client.evict(p))).await;
        report.absorb(outcomes);

        info!("Evicted clinic {}: {} key(s) removed", clinic, report.keys_removed);
        report
    }

    /// Evict a user's session and permission keys
    #[instrument(skip(self))]
    pub async fn evict_user(&self, user_id: u64) -> InvalidationReport {
        let mut report = InvalidationReport::new("evict_user", InvalidationScope::User);
        report.user_id = Some(user_id);
        report.patterns = vec![session_key(user_id), permissions_key(user_id)];

        let outcome = self.client.remove(&report.patterns).await;
        report.absorb(vec![outcome]);

        debug!("Evicted user {}: {} key(s) removed", user_id, report.keys_removed);
        report
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }
}
