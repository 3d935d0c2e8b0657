mod runner;
mod storage;

use populate_api::{State, construct_router};
use populate_crawler::{
    ConfigError, CrawlConfig, CrawlEngine, InMemoryScheduler, IntegrationManager,
    LifecycleConfig, MemoryRegistry, Registry, delivery::WebhookSink, search::TwitterConnector,
};
use runner::CrawlRunner;
use std::sync::Arc;
use std::time::Duration;
use storage::RedisStorage;
use tracing::{error, info, warn};

const LOCAL_ENTRYPOINT: &str = "local:crawl";

fn lifecycle_config() -> Result<LifecycleConfig, ConfigError> {
    match LifecycleConfig::from_env() {
        Err(ConfigError::Missing(_)) => {
            // Locally the runner is the only entrypoint
            let mut config = LifecycleConfig::new(LOCAL_ENTRYPOINT);
            if let Ok(base) = std::env::var("DESTINATION_BASE_URL") {
                config.destination_base_url = base;
            }
            Ok(config)
        }
        other => other,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "info,docker_compose_crawl_service=info,populate_crawler=info",
                )
            }),
        )
        .init();

    info!("Starting Populate crawl service");

    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://redis:6379".to_string());
    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let tick_secs: u64 = std::env::var("CRAWL_TICK_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(15);

    let storage = match RedisStorage::new(&redis_url).await {
        Ok(s) => {
            info!("Connected to Redis at {}", redis_url);
            Some(Arc::new(s))
        }
        Err(e) => {
            warn!(
                "Failed to connect to Redis: {} - running without persistence",
                e
            );
            None
        }
    };

    let scheduler = InMemoryScheduler::new();
    if let Some(storage) = &storage {
        match storage.load_snapshot().await {
            Ok(Some(snapshot)) => {
                info!(triggers = snapshot.triggers.len(), "Restored trigger table");
                scheduler.restore(snapshot);
            }
            Ok(None) => {}
            Err(e) => error!("Failed to restore trigger table: {}", e),
        }
    }

    let registry: Arc<dyn Registry> = match &storage {
        Some(storage) => storage.clone() as Arc<dyn Registry>,
        None => Arc::new(MemoryRegistry::new()),
    };

    let manager = IntegrationManager::new(
        registry,
        Arc::new(scheduler.clone()),
        lifecycle_config()?,
    );
    let app = construct_router(Arc::new(State::from_env(manager)?));

    let engine = CrawlEngine::new(
        Arc::new(TwitterConnector::from_env()?),
        Arc::new(WebhookSink::from_env()?),
        Arc::new(scheduler.clone()),
        CrawlConfig::from_env()?,
    );
    let runner = CrawlRunner::new(
        engine,
        scheduler,
        storage,
        Duration::from_secs(tick_secs),
    );
    let runner_handle = tokio::spawn(runner.run_loop());

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Lifecycle API listening on port {}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for ctrl+c: {}", e);
            }
            info!("Received shutdown signal, stopping services...");
        })
        .await?;

    runner_handle.abort();
    info!("Crawl service stopped");
    Ok(())
}
