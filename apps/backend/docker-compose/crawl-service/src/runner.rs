//! Local trigger runner
//!
//! Stands in for EventBridge and Lambda: every tick it takes the triggers
//! that have come due from the in-memory scheduler and runs one crawl
//! invocation per target. Triggers are persisted whenever they change.

use crate::storage::RedisStorage;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use populate_crawler::scheduler::TriggerTarget;
use populate_crawler::{ContinuationState, CrawlEngine, InMemoryScheduler, InvocationReport};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub struct CrawlRunner {
    engine: CrawlEngine,
    scheduler: InMemoryScheduler,
    storage: Option<Arc<RedisStorage>>,
    tick: Duration,
    persisted_revision: u64,
}

impl CrawlRunner {
    pub fn new(
        engine: CrawlEngine,
        scheduler: InMemoryScheduler,
        storage: Option<Arc<RedisStorage>>,
        tick: Duration,
    ) -> Self {
        let persisted_revision = scheduler.revision();
        Self {
            engine,
            scheduler,
            storage,
            tick,
            persisted_revision,
        }
    }

    pub async fn run_loop(mut self) {
        info!(tick_secs = self.tick.as_secs(), "Crawl runner started");

        loop {
            let reports = self.tick_once(Utc::now()).await;
            if !reports.is_empty() {
                info!(invocations = reports.len(), "Ran due crawls");
            }

            self.persist().await;
            tokio::time::sleep(self.tick).await;
        }
    }

    /// Fire every trigger due at `now`
    pub async fn tick_once(&self, now: DateTime<Utc>) -> Vec<InvocationReport> {
        let due = self.scheduler.take_due(now);

        let invocations = due
            .into_iter()
            .flat_map(|trigger| trigger.targets)
            .map(|target| self.invoke_target(target));

        join_all(invocations).await.into_iter().flatten().collect()
    }

    async fn invoke_target(&self, target: TriggerTarget) -> Option<InvocationReport> {
        let state = match ContinuationState::from_payload(&target.input) {
            Ok(state) => state,
            Err(e) => {
                error!(target = %target.id, error = %e, "Dropping trigger with unreadable payload");
                return None;
            }
        };

        match self.engine.invoke(state, &target.entrypoint).await {
            Ok(report) => Some(report),
            Err(e) => {
                error!(target = %target.id, error = %e, "Crawl invocation failed");
                None
            }
        }
    }

    async fn persist(&mut self) {
        let Some(storage) = &self.storage else {
            return;
        };

        let revision = self.scheduler.revision();
        if revision == self.persisted_revision {
            return;
        }

        match storage.save_snapshot(&self.scheduler.snapshot()).await {
            Ok(()) => self.persisted_revision = revision,
            Err(e) => warn!("Failed to persist trigger table: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use populate_crawler::delivery::DeliveryReceipt;
    use populate_crawler::{
        Client, CrawlConfig, DeliveryError, DeliveryItem, DeliverySink, FetchError,
        IntegrationManager, LifecycleConfig, MemoryRegistry, Registry, SchedulerClient,
        SearchClient, SearchConnector, SearchPage, SearchRequest, SourceCredentials, SourceItem,
    };

    const ENTRYPOINT: &str = "local:crawl";

    #[derive(Clone, Default)]
    struct OnePage {
        served: Arc<Mutex<bool>>,
    }

    #[async_trait::async_trait]
    impl SearchClient for OnePage {
        async fn search(&self, _request: &SearchRequest) -> Result<SearchPage, FetchError> {
            let mut served = self.served.lock();
            if *served {
                return Ok(SearchPage::default());
            }
            *served = true;
            Ok(SearchPage {
                items: vec![SourceItem {
                    id: "100".to_string(),
                    text: "hello".to_string(),
                    created_at: None,
                    author_id: None,
                }],
                newest_id: Some("100".to_string()),
                ..Default::default()
            })
        }
    }

    impl SearchConnector for OnePage {
        fn connect(&self, _credentials: &SourceCredentials) -> Arc<dyn SearchClient> {
            Arc::new(self.clone())
        }
    }

    #[derive(Default)]
    struct Counter {
        delivered: Mutex<usize>,
    }

    #[async_trait::async_trait]
    impl DeliverySink for Counter {
        async fn deliver(
            &self,
            _destination_url: &str,
            _item: &DeliveryItem,
        ) -> Result<DeliveryReceipt, DeliveryError> {
            *self.delivered.lock() += 1;
            Ok(DeliveryReceipt { status: 200 })
        }
    }

    async fn subscribed() -> (CrawlRunner, Arc<Counter>, InMemoryScheduler) {
        let registry = MemoryRegistry::new();
        registry
            .put_client(&Client {
                user_id: "u1".to_string(),
                account_id: None,
                credentials: Some(SourceCredentials::new("t", "s")),
            })
            .await
            .unwrap();

        let scheduler = InMemoryScheduler::new();
        let manager = IntegrationManager::new(
            Arc::new(registry),
            Arc::new(scheduler.clone()),
            LifecycleConfig::new(ENTRYPOINT),
        );
        manager
            .subscribe("u1", "rust", "https://api-gw.monday.com/automations/apps-events/9")
            .await
            .unwrap();

        let sink = Arc::new(Counter::default());
        let engine = CrawlEngine::new(
            Arc::new(OnePage::default()),
            sink.clone(),
            Arc::new(scheduler.clone()),
            CrawlConfig::default(),
        );
        let runner = CrawlRunner::new(engine, scheduler.clone(), None, Duration::from_secs(5));
        (runner, sink, scheduler)
    }

    #[tokio::test]
    async fn nothing_fires_before_the_schedule() {
        let (runner, sink, _) = subscribed().await;
        assert!(runner.tick_once(Utc::now()).await.is_empty());
        assert_eq!(*sink.delivered.lock(), 0);
    }

    #[tokio::test]
    async fn due_trigger_runs_once_and_rearms() {
        let (runner, sink, scheduler) = subscribed().await;
        let later = Utc::now() + chrono::Duration::minutes(10);

        let reports = runner.tick_once(later).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(*sink.delivered.lock(), 1);

        // Rearmed for a fresh fire after the invocation
        let trigger = scheduler.get_trigger("9").unwrap();
        assert!(trigger.enabled);
        assert!(!trigger.fired);
        let state = ContinuationState::from_payload(&trigger.targets[0].input).unwrap();
        assert_eq!(state.last_id.as_deref(), Some("100"));
    }

    #[tokio::test]
    async fn unreadable_payload_is_skipped() {
        let (runner, _, scheduler) = subscribed().await;
        scheduler
            .attach_target(
                "9",
                &TriggerTarget {
                    id: "9-target".to_string(),
                    entrypoint: ENTRYPOINT.to_string(),
                    input: "not json".to_string(),
                },
            )
            .await
            .unwrap();

        let later = Utc::now() + chrono::Duration::minutes(10);
        assert!(runner.tick_once(later).await.is_empty());
    }
}
