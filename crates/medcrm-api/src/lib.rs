//! Operations API for the MedCRM cache layer
//!
//! Health, cache status, policy listing, explicit invalidation and tenant
//! key audits. CRM routes live elsewhere; this surface exists so operators
//! can see degraded mode and clean up after incidents.

#![forbid(unsafe_code)]

pub mod dto;
pub mod handlers;
pub mod state;

pub use dto::ApiResponse;
pub use handlers::{configure_cache, configure_health};
pub use state::AppState;
