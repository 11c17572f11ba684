//! Health check handler

use crate::dto::HealthResponse;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use tracing::debug;

/// Report service health
///
/// GET /api/v1/health
///
/// Always 200: a cache outage only makes the service slower, so it is
/// reported as `degraded` rather than failing the check.
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let response = HealthResponse::from_status(state.cache.status());
    debug!("Health check: {}", response.status);
    HttpResponse::Ok().json(response)
}

/// Configure health routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check));
}
