//! MedCRM cache operations server
//!
//! Loads configuration, connects the tenant cache and serves the
//! operations API. The cache is optional at runtime: if the backend cannot
//! be reached the server still starts and reports itself as degraded.

use actix_web::{middleware, web, App, HttpResponse, HttpServer};
use anyhow::Context;
use medcrm_api::{configure_cache, configure_health, AppState};
use medcrm_cache::backends::{MemoryBackend, RedisBackend};
use medcrm_cache::{CacheClient, ClientSettings, PolicyTable};
use medcrm_core::config::RedisConfig;
use medcrm_core::traits::CacheBackend;
use medcrm_core::AppConfig;
use std::env;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// URL scheme selecting the in-process backend
const MEMORY_URL_SCHEME: &str = "memory://";

/// Configure API routes
fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .configure(configure_health)
            .configure(configure_cache),
    );
}

/// Initialize tracing/logging
fn init_tracing() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "medcrm={},medcrm_api={},medcrm_cache={},actix_web=info,redis=warn",
            log_level, log_level, log_level
        ))
    });

    let registry = tracing_subscriber::registry().with(env_filter);
    if env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false) {
        registry.with(fmt::layer().json()).init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .init();
    }
}

/// Pick the backend named by the configured URL
fn create_backend(config: &RedisConfig) -> anyhow::Result<Arc<dyn CacheBackend>> {
    if config.url.starts_with(MEMORY_URL_SCHEME) {
        warn!("Using the in-process cache backend; entries are not shared between instances");
        return Ok(Arc::new(MemoryBackend::new()));
    }

    let backend = RedisBackend::new(config).context("invalid Redis configuration")?;
    Ok(Arc::new(backend))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    init_tracing();

    info!("Starting MedCRM cache service v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load().context("failed to load configuration")?;
    let policies = Arc::new(PolicyTable::from_config(&config.cache).context("invalid cache policy")?);

    let backend = create_backend(&config.cache.redis)?;
    let cache = Arc::new(CacheClient::new(
        backend,
        ClientSettings::from(&config.cache.redis),
    ));

    if cache.connect().await {
        info!("Cache backend {} connected", cache.status().backend);
    } else {
        warn!("Cache backend unreachable at startup; serving from the database until it recovers");
    }

    let state = AppState::new(cache.clone(), policies);

    let bind_addr = config.server_addr();
    let workers = config.server.workers;
    info!(
        "Starting HTTP server on {} with {} workers",
        bind_addr, workers
    );

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            // Middleware
            .wrap(TracingLogger::default())
            .wrap(middleware::NormalizePath::trim())
            // Configure routes
            .configure(configure_routes)
            // Root redirect to health
            .route(
                "/",
                web::get().to(|| async {
                    HttpResponse::Found()
                        .append_header(("Location", "/api/v1/health"))
                        .finish()
                }),
            )
    })
    .workers(workers)
    .bind(&bind_addr)
    .with_context(|| format!("failed to bind {}", bind_addr))?
    .run()
    .await?;

    cache.close().await;
    info!("MedCRM cache service stopped");
    Ok(())
}
