//! Cache operations handlers
//!
//! Status, policy listing, explicit invalidation and key audit.

use crate::dto::{
    ApiResponse, AuditResponse, CacheStatusResponse, InvalidateRequest, PolicyListResponse,
    StatusParams,
};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use medcrm_cache::keys::{audit_keys, audit_patterns};
use medcrm_cache::{CacheOutcome, ClinicId};
use medcrm_core::AppError;
use std::collections::BTreeSet;
use tracing::{info, instrument, warn};
use validator::Validate;

/// Connection state, counters and enabled domains
///
/// GET /api/v1/cache/status
pub async fn get_status(
    state: web::Data<AppState>,
    query: web::Query<StatusParams>,
) -> HttpResponse {
    if query.refresh {
        state.cache.refresh_status().await;
    }

    let response = CacheStatusResponse {
        connection: state.cache.status(),
        stats: state.cache.stats(),
        caching_enabled: state.policies.global_enabled(),
        enabled_domains: state.policies.enabled_domains(),
    };

    HttpResponse::Ok().json(ApiResponse::success(response))
}

/// Effective policy of every domain
///
/// GET /api/v1/cache/policies
pub async fn list_policies(state: web::Data<AppState>) -> HttpResponse {
    let policies: PolicyListResponse = state
        .policies
        .iter()
        .map(|(domain, policy)| (domain.policy_name(), policy.clone()))
        .collect();

    HttpResponse::Ok().json(ApiResponse::success(policies))
}

/// Invalidate a domain after an out-of-band mutation
///
/// POST /api/v1/cache/invalidate
#[instrument(skip(state, body))]
pub async fn invalidate(
    state: web::Data<AppState>,
    body: web::Json<InvalidateRequest>,
) -> Result<HttpResponse, AppError> {
    let req = body.into_inner();
    req.validate()?;
    let domain = req.parsed_domain()?;

    let report = state
        .invalidation
        .invalidate(domain, req.operation.trim(), req.clinic_id, &req.extra_patterns)
        .await;

    if !report.rejected.is_empty() {
        warn!(
            "Rejected {} pattern(s) outside clinic {}",
            report.rejected.len(),
            req.clinic_id
        );
    }

    Ok(HttpResponse::Ok().json(ApiResponse::success(report)))
}

/// Evict every key of a clinic
///
/// DELETE /api/v1/cache/clinics/{clinic_id}
#[instrument(skip(state, path))]
pub async fn evict_clinic(
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let clinic = ClinicId::try_from(path.into_inner())?;
    let report = state.invalidation.evict_tenant(clinic).await;

    info!("Clinic {} evicted on request", clinic);
    Ok(HttpResponse::Ok().json(ApiResponse::success(report)))
}

/// Evict a user's session and permission keys
///
/// DELETE /api/v1/cache/users/{user_id}
#[instrument(skip(state, path))]
pub async fn evict_user(
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    if user_id == 0 {
        return Err(AppError::Validation(
            "user id must be a positive integer".to_string(),
        ));
    }

    let report = state.invalidation.evict_user(user_id).await;
    Ok(HttpResponse::Ok().json(ApiResponse::success(report)))
}

/// List keys naming a clinic that sit outside its namespace
///
/// GET /api/v1/cache/clinics/{clinic_id}/audit
///
/// Scans for every key mentioning the clinic and reports those a tenant
/// sweep would miss or that another clinic owns. Needs the backend: answers
/// 503 while the cache is unavailable.
#[instrument(skip(state, path))]
pub async fn audit_clinic(
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let clinic = ClinicId::try_from(path.into_inner())?;
    let patterns = audit_patterns(clinic);

    let mut keys = BTreeSet::new();
    for pattern in &patterns {
        match state.cache.scan_keys(pattern).await {
            CacheOutcome::Hit(found) => keys.extend(found),
            CacheOutcome::Miss => {}
            CacheOutcome::Unavailable => {
                return Err(AppError::CacheConnection("cache unavailable".to_string()))
            }
            CacheOutcome::Error(reason) => return Err(AppError::Cache(reason)),
        }
    }

    let findings = audit_keys(&keys, clinic);
    if !findings.is_empty() {
        warn!(
            "Audit of clinic {} found {} misplaced key(s)",
            clinic,
            findings.len()
        );
    }

    let response = AuditResponse {
        clinic_id: clinic,
        patterns,
        keys_scanned: keys.len(),
        clean: findings.is_empty(),
        findings,
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success(response)))
}

/// Configure cache operations routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/cache")
            .route("/status", web::get().to(get_status))
            .route("/policies", web::get().to(list_policies))
            .route("/invalidate", web::post().to(invalidate))
            .route("/clinics/{clinic_id}", web::delete().to(evict_clinic))
            .route("/clinics/{clinic_id}/audit", web::get().to(audit_clinic))
            .route("/users/{user_id}", web::delete().to(evict_user)),
    );
}
