#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use lambda_http::{Error, run_with_streaming_response, tracing};
use populate_api::{State, construct_router};
use populate_crawler::{
    IntegrationManager, LifecycleConfig, registry::DynamoDbRegistry,
    scheduler::AwsEventBridgeScheduler,
};
use std::sync::Arc;
use tracing_subscriber::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Error> {
    let sentry_endpoint = std::env::var("SENTRY_ENDPOINT").unwrap_or_default();

    let _sentry_guard = if sentry_endpoint.is_empty() {
        tracing::init_default_subscriber();
        None
    } else {
        let guard = sentry::init((
            sentry_endpoint,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                traces_sample_rate: 0.3,
                ..Default::default()
            },
        ));
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(sentry_tracing::layer())
            .init();
        Some(guard)
    };

    let registry = Arc::new(DynamoDbRegistry::from_env().await);
    let scheduler = Arc::new(AwsEventBridgeScheduler::from_env().await);
    let manager = IntegrationManager::new(registry, scheduler, LifecycleConfig::from_env()?);

    let state = Arc::new(State::from_env(manager)?);
    let app = construct_router(state);

    run_with_streaming_response(app).await
}
