use newsboard::auth::JwtIdentity;
use newsboard::clock::SystemClock;
use newsboard::config::{Config, StorageBackend};
use newsboard::database::{create_pool, run_migrations};
use newsboard::redis::RedisClient;
use newsboard::services::{
    background_jobs::BackgroundJobsService, ranking_service::RankingEngine,
    reconcile_service::Reconciler, vote_service::VoteLedger,
};
use newsboard::store::{DocumentStore, MemoryStore, PgStore};
use newsboard::{AppState, create_app};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "newsboard=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env().map_err(|e| format!("Failed to load configuration: {}", e))?;
    tracing::info!("Configuration loaded successfully");

    let store: Arc<dyn DocumentStore> = match (config.storage_backend, &config.database_url) {
        (StorageBackend::Postgres, Some(database_url)) => {
            let db = create_pool(database_url, &config.pool).await?;

            run_migrations(&db).await?;
            tracing::info!("Database migrations completed");

            Arc::new(PgStore::new(db))
        }
        _ => {
            tracing::warn!("Using the in-memory store; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let redis = match &config.redis_url {
        Some(redis_url) => {
            let client = RedisClient::new(redis_url).await?;
            tracing::info!("Redis client created");
            Some(Arc::new(client))
        }
        None => None,
    };

    let clock = Arc::new(SystemClock);
    let ledger = Arc::new(VoteLedger::new(store.clone(), clock.clone()));
    let shutdown = CancellationToken::new();

    // Start background jobs
    let jobs = BackgroundJobsService::new(
        Arc::new(RankingEngine::new(
            store.clone(),
            clock.clone(),
            config.ranking.clone(),
        )),
        Arc::new(Reconciler::new(store.clone(), config.ranking.page_size)),
        config.reconcile_interval_secs,
        shutdown.clone(),
    );
    jobs.start_all_jobs().await;

    // Create application state
    let state = AppState {
        store,
        ledger,
        identity: Arc::new(JwtIdentity::new(&config.jwt_secret)),
        clock,
        redis,
        config: Arc::new(config.clone()),
    };

    // Create application
    let app = create_app(state);

    // Create listener
    let listener = TcpListener::bind(format!("{}:{}", config.host, config.port)).await?;
    tracing::info!("Server listening on {}:{}", config.host, config.port);

    // Start server
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
    shutdown.cancel();
}
