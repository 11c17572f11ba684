//! Tenant-scoped caching layer for MedCRM
//!
//! Every cached value belongs to exactly one clinic. Keys are built here and
//! nowhere else, so one clinic can never read or evict another's data.
//!
//! # Features
//!
//! - Deterministic tenant-prefixed keys and eviction patterns (`keys`)
//! - Per-domain TTL and invalidation policies, overridable from config (`policy`)
//! - A client that degrades to "always miss" when the backend is down (`client`)
//! - Policy-driven invalidation after mutations (`invalidation`)
//! - Cache-aside reads (`cache_aside`)
//! - Redis and in-memory backends (`backends`)
//!
//! # Example
//!
//! ```
//! use medcrm_cache::backends::MemoryBackend;
//! use medcrm_cache::keys::{appointment_key, ClinicId, Domain};
//! use medcrm_cache::{CacheClient, ClientSettings, InvalidationDriver, PolicyTable};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let client = Arc::new(CacheClient::new(Arc::new(MemoryBackend::new()), ClientSettings::default()));
//! client.connect().await;
//! let policies = Arc::new(PolicyTable::default());
//!
//! let clinic = ClinicId::new(42).unwrap();
//! let key = appointment_key(clinic, 7);
//! client.set(&key, &"confirmed", policies.ttl(Domain::Appointments)).await;
//!
//! let driver = InvalidationDriver::new(client.clone(), policies);
//! let report = driver.invalidate(Domain::Appointments, "reschedule", clinic, &[]).await;
//! assert_eq!(report.keys_removed, 1);
//! # }
//! ```

pub mod backends;
pub mod cache_aside;
pub mod client;
pub mod invalidation;
pub mod keys;
pub mod pattern;
pub mod policy;
pub mod stats;

pub use cache_aside::TenantCache;
pub use client::{CacheClient, CacheOutcome, ClientSettings, ConnectionStatus};
pub use invalidation::{InvalidationDriver, InvalidationReport, InvalidationScope};
pub use keys::{ClinicId, Domain};
pub use policy::{CachePolicy, PolicyTable};
pub use stats::StatsSnapshot;
