#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use lambda_runtime::{Error, LambdaEvent, run, service_fn, tracing};
use populate_crawler::{
    ContinuationState, CrawlConfig, CrawlEngine,
    delivery::WebhookSink,
    scheduler::AwsEventBridgeScheduler,
    search::TwitterConnector,
};
use serde::Serialize;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Summary returned to the invoking trigger
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CrawlResponse {
    integration_id: String,
    pages_fetched: u32,
    accepted: usize,
    rejected: usize,
    phase: String,
    next_fire_at: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let sentry_endpoint = std::env::var("SENTRY_ENDPOINT").unwrap_or_default();

    // Can be overridden with RUST_LOG
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,hyper=warn,hyper_util=warn,rustls=warn,h2=warn,aws_smithy_runtime=warn")
    });

    let _sentry_guard = if sentry_endpoint.is_empty() {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
            .init();
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
            .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
            .with(sentry_tracing::layer())
            .init();
        Some(guard)
    };

    let config = CrawlConfig::from_env()?;
    let connector = Arc::new(TwitterConnector::from_env()?);
    let sink = Arc::new(WebhookSink::from_env()?);
    let scheduler = Arc::new(AwsEventBridgeScheduler::from_env().await);
    let engine = Arc::new(CrawlEngine::new(connector, sink, scheduler, config));

    run(service_fn(move |event| {
        let engine = engine.clone();
        async move { crawl_handler(&engine, event).await }
    }))
    .await
}

async fn crawl_handler(
    engine: &CrawlEngine,
    event: LambdaEvent<ContinuationState>,
) -> Result<CrawlResponse, Error> {
    // Triggers target this function, so its own ARN is the rearm entrypoint
    let entrypoint = event.context.invoked_function_arn.clone();

    let report = engine.invoke(event.payload, &entrypoint).await.map_err(|e| {
        tracing::error!(error = %e, "Crawl invocation failed");
        Error::from(e.to_string())
    })?;

    Ok(CrawlResponse {
        integration_id: report.integration_id.to_string(),
        pages_fetched: report.pages_fetched,
        accepted: report.delivery.accepted,
        rejected: report.delivery.rejected,
        phase: report.phase.to_string(),
        next_fire_at: report.next_fire_at.map(|at| at.to_rfc3339()),
    })
}
