//! Per-domain cache policies
//!
//! The table is the single source of truth for how long each domain is
//! cached, which operations invalidate it, and whether it is cached at all.
//! It is built once at startup from compiled-in defaults plus optional
//! overrides from configuration, and never changes afterwards.
//!
//! TTLs track the cost of staleness: session data is short-lived, analytics
//! is expensive to recompute and tolerant of staleness.

use crate::keys::Domain;
use medcrm_core::config::{CacheConfig, PolicyOverride};
use medcrm_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// TTL applied to domains without an explicit policy (5 minutes)
pub const DEFAULT_TTL_SECS: u64 = 300;

/// TTL for contacts (5 minutes)
pub const CONTACTS_TTL_SECS: u64 = 300;

/// TTL for appointments (2 minutes)
pub const APPOINTMENTS_TTL_SECS: u64 = 120;

/// TTL for medical records (30 minutes)
pub const MEDICAL_RECORDS_TTL_SECS: u64 = 1800;

/// TTL for the sales pipeline (10 minutes)
pub const PIPELINE_TTL_SECS: u64 = 600;

/// TTL for analytics (1 hour)
pub const ANALYTICS_TTL_SECS: u64 = 3600;

/// TTL for clinic settings (2 hours)
pub const SETTINGS_TTL_SECS: u64 = 7200;

/// TTL for AI templates (1 hour)
pub const AI_TEMPLATES_TTL_SECS: u64 = 3600;

/// TTL for user sessions (15 minutes)
pub const USER_SESSION_TTL_SECS: u64 = 900;

/// Longest TTL an override may set (30 days)
pub const MAX_TTL_SECS: u64 = 30 * 24 * 3600;

/// How a domain's cache entries are kept in step with the database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefreshStrategy {
    WriteThrough,
    WriteBehind,
    ReadThrough,
    CacheAside,
}

impl FromStr for RefreshStrategy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "write-through" => Ok(RefreshStrategy::WriteThrough),
            "write-behind" => Ok(RefreshStrategy::WriteBehind),
            "read-through" => Ok(RefreshStrategy::ReadThrough),
            "cache-aside" => Ok(RefreshStrategy::CacheAside),
            _ => Err(AppError::Config(format!("unknown refresh strategy: {}", s))),
        }
    }
}

/// Relative importance of keeping a domain warm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePriority {
    High,
    Medium,
    Low,
}

impl FromStr for CachePriority {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(CachePriority::High),
            "medium" => Ok(CachePriority::Medium),
            "low" => Ok(CachePriority::Low),
            _ => Err(AppError::Config(format!("unknown cache priority: {}", s))),
        }
    }
}

/// Caching behaviour of one domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachePolicy {
    pub ttl_secs: u64,
    /// Operations after which the domain's keys are evicted
    pub invalidate_on: BTreeSet<String>,
    /// Operations that evict the whole clinic instead of just the domain
    pub evict_tenant_on: BTreeSet<String>,
    pub strategy: RefreshStrategy,
    pub priority: CachePriority,
    pub enabled: bool,
}

impl CachePolicy {
    fn new(
        ttl_secs: u64,
        invalidate_on: &[&str],
        strategy: RefreshStrategy,
        priority: CachePriority,
    ) -> Self {
        Self {
            ttl_secs,
            invalidate_on: operation_set(invalidate_on.iter().copied()),
            evict_tenant_on: BTreeSet::new(),
            strategy,
            priority,
            enabled: true,
        }
    }

    fn evicting_tenant_on(mut self, operations: &[&str]) -> Self {
        self.evict_tenant_on = operation_set(operations.iter().copied());
        self
    }

    /// Whether `operation` invalidates this domain
    pub fn invalidated_by(&self, operation: &str) -> bool {
        self.invalidate_on.contains(&normalize_operation(operation))
    }

    /// Whether `operation` evicts the whole clinic
    pub fn evicts_tenant_on(&self, operation: &str) -> bool {
        self.evict_tenant_on.contains(&normalize_operation(operation))
    }

    /// Layer a configured override on top of this policy
    ///
    /// Every operation in `evict_tenant_on` must also be in `invalidate_on`;
    /// otherwise the tenant eviction could never run.
    fn apply(&mut self, name: &str, overrides: &PolicyOverride) -> AppResult<()> {
        if let Some(ttl) = overrides.ttl_secs {
            if ttl == 0 || ttl > MAX_TTL_SECS {
                return Err(AppError::Config(format!(
                    "cache policy {}: ttl_secs must be between 1 and {}",
                    name, MAX_TTL_SECS
                )));
            }
            self.ttl_secs = ttl;
        }
        if let Some(enabled) = overrides.enabled {
            self.enabled = enabled;
        }
        if let Some(ref ops) = overrides.invalidate_on {
            self.invalidate_on = operation_set(ops.iter().map(String::as_str));
        }
        if let Some(ref ops) = overrides.evict_tenant_on {
            self.evict_tenant_on = operation_set(ops.iter().map(String::as_str));
        }
        if let Some(ref strategy) = overrides.strategy {
            self.strategy = strategy.parse()?;
        }
        if let Some(ref priority) = overrides.priority {
            self.priority = priority.parse()?;
        }

        let unreachable: Vec<&str> = self
            .evict_tenant_on
            .difference(&self.invalidate_on)
            .map(String::as_str)
            .collect();
        if !unreachable.is_empty() {
            return Err(AppError::Config(format!(
                "cache policy {}: evict_tenant_on lists operations missing from invalidate_on: {}",
                name,
                unreachable.join(", ")
            )));
        }
        Ok(())
    }
}

impl Default for CachePolicy {
    /// 5 minutes, evicted on create/update/delete, cache-aside, medium priority
    fn default() -> Self {
        CachePolicy::new(
            DEFAULT_TTL_SECS,
            &["create", "update", "delete"],
            RefreshStrategy::CacheAside,
            CachePriority::Medium,
        )
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ttl={}s strategy={:?} priority={:?} enabled={}",
            self.ttl_secs, self.strategy, self.priority, self.enabled
        )
    }
}

fn normalize_operation(operation: &str) -> String {
    operation.trim().to_ascii_lowercase()
}

fn operation_set<'a>(operations: impl Iterator<Item = &'a str>) -> BTreeSet<String> {
    operations.map(normalize_operation).collect()
}

/// Compiled-in policy for a domain
pub fn default_policy(domain: Domain) -> CachePolicy {
    use CachePriority::*;
    use RefreshStrategy::*;

    match domain {
        Domain::Contacts => CachePolicy::new(
            CONTACTS_TTL_SECS,
            &["create", "update", "delete", "import", "merge", "tag"],
            CacheAside,
            Medium,
        ),
        Domain::Appointments => CachePolicy::new(
            APPOINTMENTS_TTL_SECS,
            &[
                "create",
                "update",
                "delete",
                "reschedule",
                "cancel",
                "confirm",
                "complete",
                "no_show",
            ],
            WriteThrough,
            High,
        ),
        Domain::MedicalRecords => CachePolicy::new(
            MEDICAL_RECORDS_TTL_SECS,
            &["create", "update", "delete", "attach_document", "sign"],
            ReadThrough,
            High,
        ),
        Domain::Pipeline => CachePolicy::new(
            PIPELINE_TTL_SECS,
            &["create", "update", "delete", "move_stage", "close"],
            CacheAside,
            Medium,
        ),
        Domain::Analytics => CachePolicy::new(
            ANALYTICS_TTL_SECS,
            &["recompute", "daily_rollup", "delete"],
            WriteBehind,
            Low,
        ),
        Domain::Settings => CachePolicy::new(
            SETTINGS_TTL_SECS,
            &["update", "reset", "integration_change", "delete"],
            ReadThrough,
            High,
        )
        .evicting_tenant_on(&["reset", "delete"]),
        Domain::AiTemplates => CachePolicy::new(
            AI_TEMPLATES_TTL_SECS,
            &["create", "update", "delete", "publish"],
            CacheAside,
            Low,
        ),
        Domain::UserSession => CachePolicy::new(
            USER_SESSION_TTL_SECS,
            &[
                "login",
                "logout",
                "role_change",
                "permission_change",
                "password_change",
                "switch_clinic",
            ],
            WriteThrough,
            High,
        ),
    }
}

/// Immutable policy table
#[derive(Debug, Clone)]
pub struct PolicyTable {
    policies: HashMap<Domain, CachePolicy>,
    fallback: CachePolicy,
    global_enabled: bool,
}

impl PolicyTable {
    /// Table with the compiled-in defaults
    ///
    /// `global_enabled` is the process-wide kill switch.
    pub fn with_defaults(global_enabled: bool) -> Self {
        let policies = Domain::ALL
            .iter()
            .map(|&domain| (domain, default_policy(domain)))
            .collect();

        Self {
            policies,
            fallback: CachePolicy::default(),
            global_enabled,
        }
    }

    /// Build the table from configuration
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an override naming an unknown domain,
    /// a zero TTL, or an unknown strategy/priority.
    pub fn from_config(config: &CacheConfig) -> AppResult<Self> {
        let mut table = Self::with_defaults(config.enabled);

        for (name, overrides) in &config.policies {
            let domain: Domain = name
                .parse()
                .map_err(|_| AppError::Config(format!("cache policy for unknown domain: {}", name)))?;

            let policy = table
                .policies
                .get_mut(&domain)
                .ok_or_else(|| AppError::Internal(format!("missing default policy: {}", domain)))?;
            policy.apply(name, overrides)?;
            debug!("Cache policy override for {}: {}", domain, policy);
        }

        if !table.global_enabled {
            info!("Caching globally disabled; every read falls through to the database");
        }

        Ok(table)
    }

    /// Policy for a domain name; unknown names get the default policy
    ///
    /// Never fails, so every caller always has a usable policy.
    pub fn policy(&self, domain: &str) -> &CachePolicy {
        match domain.parse::<Domain>() {
            Ok(domain) => self.policy_for(domain),
            Err(_) => &self.fallback,
        }
    }

    pub fn policy_for(&self, domain: Domain) -> &CachePolicy {
        self.policies.get(&domain).unwrap_or(&self.fallback)
    }

    pub fn should_invalidate(&self, domain: Domain, operation: &str) -> bool {
        self.policy_for(domain).invalidated_by(operation)
    }

    /// Whether `operation` on `domain` evicts the whole clinic
    pub fn evicts_tenant(&self, domain: Domain, operation: &str) -> bool {
        self.policy_for(domain).evicts_tenant_on(operation)
    }

    /// TTL in seconds
    pub fn ttl(&self, domain: Domain) -> u64 {
        self.policy_for(domain).ttl_secs
    }

    /// Cached only when both the kill switch and the domain policy allow it
    pub fn is_enabled(&self, domain: Domain) -> bool {
        self.global_enabled && self.policy_for(domain).enabled
    }

    pub fn global_enabled(&self) -> bool {
        self.global_enabled
    }

    pub fn enabled_domains(&self) -> Vec<Domain> {
        Domain::ALL
            .iter()
            .copied()
            .filter(|&domain| self.is_enabled(domain))
            .collect()
    }

    /// All configured policies in domain order
    pub fn iter(&self) -> impl Iterator<Item = (Domain, &CachePolicy)> + '_ {
        Domain::ALL
            .iter()
            .map(move |&domain| (domain, self.policy_for(domain)))
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::with_defaults(true)
    }
}
