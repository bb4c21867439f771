mod config;
mod db;
mod errors;
mod models;
mod quota;
mod routes;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, StoreBackend};
use crate::db::create_pool;
use crate::quota::audit::TracingAuditSink;
use crate::quota::period::SystemClock;
use crate::quota::store::{MemoryQuotaStore, PgQuotaStore, QuotaStore, RedisQuotaStore};
use crate::quota::QuotaService;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting resume quota service v{}", env!("CARGO_PKG_VERSION"));

    let store = build_store(&config).await?;
    info!(
        "Quota store: {} (on failure: {}, timeout: {}ms, conflict retries: {})",
        store.backend(),
        config.policy.on_store_failure,
        config.policy.store_timeout.as_millis(),
        config.policy.conflict_retries
    );

    for (feature, cap) in config.limits.entries() {
        info!("Daily limit {feature}={cap}");
    }

    let quota = QuotaService::new(
        Arc::new(config.limits.clone()),
        store,
        Arc::new(SystemClock),
        Arc::new(TracingAuditSink),
        config.policy,
    );

    // Build app state
    let state = AppState {
        quota: Arc::new(quota),
    };

    // Build router
    let app = build_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()), // TODO: restrict origins once the web client domain is fixed
    );

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Connects the configured counter backend.
async fn build_store(config: &Config) -> Result<Arc<dyn QuotaStore>> {
    let store: Arc<dyn QuotaStore> = match &config.backend {
        StoreBackend::Postgres { database_url } => {
            let pool = create_pool(database_url, config.policy.store_timeout).await?;
            Arc::new(PgQuotaStore::new(pool))
        }
        StoreBackend::Redis { redis_url } => {
            let client = redis::Client::open(redis_url.as_str())?;
            Arc::new(RedisQuotaStore::connect(client).await?)
        }
        StoreBackend::Memory => {
            tracing::warn!("In-memory quota store: counters are per process and lost on restart");
            Arc::new(MemoryQuotaStore::new())
        }
    };
    Ok(store)
}
