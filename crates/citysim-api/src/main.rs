use std::sync::Arc;

use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use citysim_core::config::LayeredConfig;
use citysim_store::cache::{CacheConfig, CacheFactory};
use citysim_store::memory::{MemoryGeometryStore, MemoryRunStore};
use citysim_store::ports::{GeometryStore, RunStore};
use citysim_store::postgres::{PostgresConfig, PostgresStore};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use citysim_api::{create_router, ApiConfig, AppState};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "citysim_api=info,citysim_engine=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run(ApiConfig::from_env()).await {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(config: ApiConfig) -> anyhow::Result<()> {
    let mut engine_config = LayeredConfig::with_defaults();
    if let Some(path) = &config.config_file {
        engine_config = engine_config
            .load_from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?;
    }
    let engine_config = engine_config.load_from_env();
    engine_config.validate().context("Invalid engine configuration")?;

    tracing::info!(
        port = config.port,
        postgres = config.uses_postgres(),
        max_concurrent_runs = engine_config.max_concurrent_runs.value,
        "Starting CitySim API server"
    );

    let (run_store, geometry_store) = init_storage(&config).await?;
    let cache = CacheFactory::new().create_or_get(CacheConfig::from_layered(&engine_config));

    let state = AppState::compose(run_store, geometry_store, cache, engine_config);
    let resumed = state
        .dispatcher
        .resume_pending()
        .await
        .context("Failed to resume pending runs")?;
    if !resumed.is_empty() {
        tracing::info!(count = resumed.len(), "Resumed runs from a previous process");
    }

    let origin = config
        .cors_origin
        .parse::<HeaderValue>()
        .with_context(|| format!("Invalid CORS origin '{}'", config.cors_origin))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let app = create_router(state).layer(cors);

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Listening on {}", addr);
    tracing::info!("CORS enabled for {}", config.cors_origin);

    axum::serve(listener, app).await.context("Server error")
}

/// Select PostgreSQL when DATABASE_URL is set, in-memory stores otherwise
async fn init_storage(
    config: &ApiConfig,
) -> anyhow::Result<(Arc<dyn RunStore>, Arc<dyn GeometryStore>)> {
    match &config.database_url {
        Some(_) => {
            tracing::info!("DATABASE_URL found, connecting to PostgreSQL...");
            let pg_config = PostgresConfig::from_env().context("Invalid PostgreSQL configuration")?;
            let store = Arc::new(PostgresStore::connect(pg_config).await.context(
                "Failed to connect to PostgreSQL. Ensure it is running and DATABASE_URL is correct",
            )?);
            for migration in store.migration_status().await? {
                tracing::debug!(
                    version = migration.version,
                    description = %migration.description,
                    applied = migration.applied,
                    "Schema migration"
                );
            }

            let run_store: Arc<dyn RunStore> = store.clone();
            let geometry_store: Arc<dyn GeometryStore> = store;
            Ok((run_store, geometry_store))
        }
        None => {
            tracing::info!("Using in-memory storage (set DATABASE_URL for PostgreSQL)");
            let run_store: Arc<dyn RunStore> = Arc::new(MemoryRunStore::new());
            let geometry_store: Arc<dyn GeometryStore> = Arc::new(MemoryGeometryStore::new());
            Ok((run_store, geometry_store))
        }
    }
}
