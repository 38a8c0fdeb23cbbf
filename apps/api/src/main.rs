use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use appointment_cell::{
    CheckInTokenStore, ClinicEngine, ClinicStore, LogNotifier, MemoryTokenStore, PgClinicBackend, SystemClock,
};
use queue_runtime_cell::{
    DisplayBroadcaster, FanoutNotifier, RedisTokenStore, SweepWorker, SweepWorkerConfig, WebhookNotifier,
};
use shared_config::AppConfig;
use shared_database::PoolSettings;

/// Connect, verify and migrate the clinic database. Startup stops here when
/// Postgres is missing or unreachable.
async fn open_store(config: &AppConfig) -> anyhow::Result<ClinicStore> {
    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set")?;

    let settings = PoolSettings {
        max_connections: config.database_max_connections.max(1),
        ..PoolSettings::default()
    };
    let pool = shared_database::create_pool(url, &settings)
        .await
        .context("Failed to connect to database")?;
    info!("Database connection pool created");

    shared_database::health_check(&pool)
        .await
        .context("Database health check failed")?;
    info!("Database health check passed");

    shared_database::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    Ok(ClinicStore::new(Arc::new(PgClinicBackend::new(pool))))
}

async fn token_store(config: &AppConfig, clock: Arc<SystemClock>) -> anyhow::Result<Arc<dyn CheckInTokenStore>> {
    match config.redis_url.as_deref() {
        Some(url) => {
            let store = RedisTokenStore::connect(url)
                .await
                .context("Failed to connect the check-in token store to Redis")?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(MemoryTokenStore::new(clock))),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting clinic slot engine");

    let config = Arc::new(AppConfig::from_env());
    let clock = Arc::new(SystemClock);

    let store = Arc::new(open_store(&config).await?);
    let tokens = token_store(&config, clock.clone()).await?;

    let broadcaster = DisplayBroadcaster::new();
    let mut notifier = FanoutNotifier::new()
        .with(Arc::new(LogNotifier))
        .with(Arc::new(broadcaster.clone()));
    if let Some(url) = config.notification_webhook_url.as_deref() {
        notifier = notifier.with(Arc::new(WebhookNotifier::new(url)?));
    }

    let engine = Arc::new(ClinicEngine::new(
        store,
        clock,
        Arc::new(notifier),
        tokens,
        config.rules.clone(),
    ));

    let sweeper = Arc::new(SweepWorker::new(SweepWorkerConfig::from_app_config(&config), engine.clone()));
    let sweeper_task = {
        let sweeper = sweeper.clone();
        tokio::spawn(async move { sweeper.start().await })
    };

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = router::create_router(config.clone(), engine, broadcaster, Some(sweeper.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    sweeper.shutdown().await;
    match sweeper_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Sweep worker exited with error: {}", e),
        Err(e) => warn!("Sweep worker task failed: {}", e),
    }

    info!("Clinic slot engine stopped");
    Ok(())
}
