//! HTTP request handlers

pub mod cache;
pub mod health;

pub use cache::configure as configure_cache;
pub use health::configure as configure_health;
