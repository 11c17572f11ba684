//! MedCRM Core Library
//!
//! This crate provides the foundational types, traits, and error handling
//! for the MedCRM tenant cache layer. It includes:
//!
//! - Unified error handling with HTTP response mapping
//! - Application configuration (server, Redis, cache policies)
//! - The `CacheBackend` trait implemented by concrete key-value stores

pub mod config;
pub mod error;
pub mod traits;

pub use config::AppConfig;
pub use error::AppError;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
