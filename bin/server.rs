// Locale Catalog - Web Server
// REST API over the catalog store with Axum

use anyhow::Context;
use locale_catalog::auth::Authorizer;
use locale_catalog::catalog::CatalogService;
use locale_catalog::config::AppConfig;
use locale_catalog::server::{router, AppState, API_PREFIX};
use locale_catalog::telemetry;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();

    let config = AppConfig::from_env().context("Failed to read configuration")?;
    let service = CatalogService::from_config(&config)
        .with_context(|| format!("Failed to open database at {:?}", config.database_path))?;
    info!(database = ?config.database_path, "database opened");

    if config.master_key.is_none() {
        warn!("CATALOG_MASTER_KEY is not set, only stored API keys can authenticate");
    }
    let auth = Authorizer::new(service.store().clone(), config.master_key.clone());

    let app = router(AppState::new(service, auth))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, api = API_PREFIX, "🚀 server running");

    axum::serve(listener, app)
        .await
        .context("Server stopped unexpectedly")?;
    Ok(())
}
