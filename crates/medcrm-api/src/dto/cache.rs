//! Cache operations DTOs

use medcrm_cache::keys::AuditFinding;
use medcrm_cache::{CachePolicy, ClinicId, ConnectionStatus, Domain, StatsSnapshot};
use medcrm_core::AppResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::{Validate, ValidationError};

/// Health check response
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `healthy` when the cache backend answers, `degraded` otherwise
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub cache: ConnectionStatus,
}

impl HealthResponse {
    pub fn from_status(cache: ConnectionStatus) -> Self {
        Self {
            status: if cache.available { "healthy" } else { "degraded" },
            service: "medcrm-cache",
            version: env!("CARGO_PKG_VERSION"),
            cache,
        }
    }
}

/// Query parameters for the status endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusParams {
    /// Probe the backend before answering
    #[serde(default)]
    pub refresh: bool,
}

/// Cache status response
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatusResponse {
    pub connection: ConnectionStatus,
    pub stats: StatsSnapshot,
    /// Process-wide kill switch
    pub caching_enabled: bool,
    pub enabled_domains: Vec<Domain>,
}

/// Policies keyed by policy name
pub type PolicyListResponse = BTreeMap<&'static str, CachePolicy>;

/// Explicit invalidation request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct InvalidateRequest {
    pub clinic_id: ClinicId,
    /// Policy name or key tag (`medicalRecords`, `medical_records`)
    #[validate(length(min = 1, max = 64, message = "Domain is required"))]
    pub domain: String,
    #[validate(
        length(min = 1, max = 64, message = "Operation is required"),
        custom(function = "not_blank")
    )]
    pub operation: String,
    #[serde(default)]
    #[validate(length(max = 16, message = "At most 16 extra patterns"))]
    pub extra_patterns: Vec<String>,
}

impl InvalidateRequest {
    /// Resolve the domain name
    pub fn parsed_domain(&self) -> AppResult<Domain> {
        self.domain.trim().parse()
    }
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

/// Result of a tenant key audit
#[derive(Debug, Clone, Serialize)]
pub struct AuditResponse {
    pub clinic_id: ClinicId,
    pub patterns: Vec<String>,
    pub keys_scanned: usize,
    /// Keys naming the clinic outside its `clinic_{id}:` namespace
    pub findings: Vec<AuditFinding>,
    pub clean: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use medcrm_cache::invalidation::MAX_EXTRA_PATTERNS;
    use medcrm_core::AppError;

    #[test]
    fn test_invalidate_request_defaults() {
        let req: InvalidateRequest = serde_json::from_str(
            r#"{"clinic_id": 5, "domain": "medical_records", "operation": "sign"}"#,
        )
        .unwrap();

        assert_eq!(req.clinic_id.get(), 5);
        assert!(req.extra_patterns.is_empty());
        assert!(req.validate().is_ok());
        assert_eq!(req.parsed_domain().unwrap(), Domain::MedicalRecords);
    }

    #[test]
    fn test_invalidate_request_rejects_zero_clinic() {
        let result: Result<InvalidateRequest, _> = serde_json::from_str(
            r#"{"clinic_id": 0, "domain": "contacts", "operation": "update"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_invalidate_request_validation() {
        let mut req = InvalidateRequest {
            clinic_id: ClinicId::new(1).unwrap(),
            domain: "billing".to_string(),
            operation: "update".to_string(),
            extra_patterns: vec![],
        };
        assert!(req.validate().is_ok());
        assert!(matches!(req.parsed_domain(), Err(AppError::Validation(_))));

        req.domain = "contacts".to_string();
        req.operation = "  ".to_string();
        assert!(req.validate().is_err());

        req.operation = "".to_string();
        assert!(req.validate().is_err());

        req.operation = "x".repeat(65);
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_extra_patterns_limit_matches_driver() {
        let mut req = InvalidateRequest {
            clinic_id: ClinicId::new(1).unwrap(),
            domain: "contacts".to_string(),
            operation: "update".to_string(),
            extra_patterns: vec!["clinic_1:contacts*".to_string(); MAX_EXTRA_PATTERNS],
        };
        assert!(req.validate().is_ok());

        req.extra_patterns.push("clinic_1:analytics*".to_string());
        let err = AppError::from(req.validate().unwrap_err());
        assert_eq!(err.error_code(), "validation_error");
    }

    #[test]
    fn test_health_status_label() {
        let status = ConnectionStatus {
            backend: "memory",
            available: false,
            connected_since: None,
            last_error: Some("not connected".to_string()),
            last_error_at: None,
        };
        assert_eq!(HealthResponse::from_status(status.clone()).status, "degraded");

        let status = ConnectionStatus {
            available: true,
            ..status
        };
        assert_eq!(HealthResponse::from_status(status).status, "healthy");
    }
}
