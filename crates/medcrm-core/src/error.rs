//! Unified error handling for MedCRM
//!
//! This module provides the error type shared by the cache layer and the
//! operations API, with automatic HTTP response mapping.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Main application error type
///
/// Cache backends report failures through this type. The cache client never
/// lets it escape to callers; only the operations API turns it into a response.
#[derive(Error, Debug)]
pub enum AppError {
    // ==================== Cache Errors ====================
    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Cache connection failed: {0}")]
    CacheConnection(String),

    #[error("Cache command timed out after {0} ms")]
    CacheTimeout(u64),

    // ==================== Validation Errors ====================
    #[error("Validation error: {0}")]
    Validation(String),

    // ==================== Resource Errors ====================
    #[error("Not found: {0}")]
    NotFound(String),

    // ==================== Internal Errors ====================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AppError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation(_) => StatusCode::BAD_REQUEST,

            // 404 Not Found
            AppError::NotFound(_) => StatusCode::NOT_FOUND,

            // 503 Service Unavailable
            AppError::CacheConnection(_) | AppError::CacheTimeout(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            // 500 Internal Server Error
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Cache(_) => "cache_error",
            AppError::CacheConnection(_) => "cache_connection_error",
            AppError::CacheTimeout(_) => "cache_timeout",
            AppError::Validation(_) => "validation_error",
            AppError::NotFound(_) => "not_found",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
            AppError::Serialization(_) => "serialization_error",
        }
    }

    /// Whether the error means the backend itself is unreachable
    ///
    /// Connection-class errors flip the cache client into degraded mode;
    /// everything else is a per-command failure.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, AppError::CacheConnection(_) | AppError::CacheTimeout(_))
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        AppError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let body = json!({
            "error": self.error_code(),
            "message": self.to_string(),
            "status": status.as_u16(),
        });

        HttpResponse::build(status).json(body)
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}
