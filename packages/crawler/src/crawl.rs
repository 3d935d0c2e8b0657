//! Crawl invocation - scan one integration, then rearm its trigger

use crate::config::CrawlConfig;
use crate::delivery::{DeliveryReport, DeliverySink};
use crate::lifecycle::{IntegrationPhase, LifecycleError};
use crate::rearm::{RearmOutcome, Rearmer};
use crate::scan::{Termination, run_scan};
use crate::scheduler::{SchedulerClient, SchedulerError};
use crate::search::SearchConnector;
use crate::state::{ContinuationState, IntegrationId, StateError};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Error type for a crawl invocation
///
/// Scan failures never surface here; they end the scan and are rescheduled.
#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    #[error("Invalid continuation state: {0}")]
    State(#[from] StateError),

    #[error(transparent)]
    Phase(#[from] LifecycleError),

    #[error("Failed to rearm trigger for {integration_id}: {source}")]
    Rearm {
        integration_id: String,
        #[source]
        source: SchedulerError,
    },
}

/// What one invocation did
#[derive(Debug, Clone)]
pub struct InvocationReport {
    pub integration_id: IntegrationId,
    pub pages_fetched: u32,
    pub delivery: DeliveryReport,
    pub termination: Termination,
    /// State committed into the rearmed trigger
    pub state: ContinuationState,
    /// `Armed` after a clean scan, `Backoff` after an aborted one,
    /// `Deprovisioned` if the integration was unsubscribed meanwhile
    pub phase: IntegrationPhase,
    /// Absent once deprovisioned
    pub next_fire_at: Option<DateTime<Utc>>,
}

/// The crawl entrypoint's logic
#[derive(Clone)]
pub struct CrawlEngine {
    connector: Arc<dyn SearchConnector>,
    sink: Arc<dyn DeliverySink>,
    rearmer: Rearmer,
    config: CrawlConfig,
}

impl CrawlEngine {
    pub fn new(
        connector: Arc<dyn SearchConnector>,
        sink: Arc<dyn DeliverySink>,
        scheduler: Arc<dyn SchedulerClient>,
        config: CrawlConfig,
    ) -> Self {
        Self {
            connector,
            sink,
            rearmer: Rearmer::new(scheduler, config.rearm_delay_minutes),
            config,
        }
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    /// Run one invocation for the state a trigger delivered.
    ///
    /// The trigger is rearmed whatever the scan's outcome; only a failure to
    /// rearm is returned as an error.
    #[tracing::instrument(name = "crawl", skip_all, fields(integration_id))]
    pub async fn invoke(
        &self,
        state: ContinuationState,
        entrypoint: &str,
    ) -> Result<InvocationReport, CrawlError> {
        let id = state.integration_id()?;
        tracing::Span::current().record("integration_id", id.as_str());
        tracing::info!(
            last_id = ?state.last_id,
            next_token = ?state.next_token,
            "Crawl invoked"
        );

        let mut phase = IntegrationPhase::Armed.transition(IntegrationPhase::Scanning)?;

        let client = self.connector.connect(&state.credentials);
        let scan = run_scan(client.as_ref(), self.sink.as_ref(), state, &self.config).await;

        let outcome = self
            .rearmer
            .rearm(&id, entrypoint, &scan.state)
            .await
            .map_err(|source| CrawlError::Rearm {
                integration_id: id.to_string(),
                source,
            })?;

        phase = match outcome {
            RearmOutcome::Deprovisioned => phase.transition(IntegrationPhase::Deprovisioned)?,
            RearmOutcome::Armed(_) if scan.termination.is_abort() => {
                phase.transition(IntegrationPhase::Backoff)?
            }
            RearmOutcome::Armed(_) => phase.transition(IntegrationPhase::Armed)?,
        };

        tracing::info!(
            pages = scan.pages_fetched,
            delivered = scan.delivery.accepted,
            failed = scan.delivery.failed + scan.delivery.rejected,
            termination = ?scan.termination,
            phase = %phase,
            "Crawl finished"
        );

        Ok(InvocationReport {
            integration_id: id,
            pages_fetched: scan.pages_fetched,
            delivery: scan.delivery,
            termination: scan.termination,
            state: scan.state,
            phase,
            next_fire_at: outcome.fire_at(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{DeliveryError, DeliveryReceipt};
    use crate::scheduler::{FireOnce, InMemoryScheduler, SchedulerResult, TriggerTarget};
    use crate::search::{FetchError, SearchClient, SearchPage, SearchRequest};
    use crate::state::SourceCredentials;
    use crate::types::{DeliveryItem, SourceItem};

    struct Fixed(Result<SearchPage, u16>);

    #[async_trait::async_trait]
    impl SearchClient for Fixed {
        async fn search(&self, _request: &SearchRequest) -> Result<SearchPage, FetchError> {
            match &self.0 {
                Ok(page) => Ok(page.clone()),
                Err(status) => Err(FetchError::Status {
                    status: *status,
                    body: String::new(),
                }),
            }
        }
    }

    struct FixedConnector(Result<SearchPage, u16>);

    impl SearchConnector for FixedConnector {
        fn connect(&self, _credentials: &SourceCredentials) -> Arc<dyn SearchClient> {
            Arc::new(Fixed(self.0.clone()))
        }
    }

    struct Accepting;

    #[async_trait::async_trait]
    impl DeliverySink for Accepting {
        async fn deliver(
            &self,
            _destination_url: &str,
            _item: &DeliveryItem,
        ) -> Result<DeliveryReceipt, DeliveryError> {
            Ok(DeliveryReceipt { status: 200 })
        }
    }

    struct Broken;

    #[async_trait::async_trait]
    impl SchedulerClient for Broken {
        async fn upsert_trigger(&self, _: &str, _: &FireOnce, _: bool) -> SchedulerResult<String> {
            Err(SchedulerError::ProviderError("throttled".into()))
        }
        async fn trigger_exists(&self, _: &str) -> SchedulerResult<bool> {
            Ok(true)
        }
        async fn attach_target(&self, _: &str, _: &TriggerTarget) -> SchedulerResult<()> {
            Ok(())
        }
        async fn remove_targets(&self, _: &str, _: &[String]) -> SchedulerResult<()> {
            Ok(())
        }
        async fn remove_trigger(&self, _: &str) -> SchedulerResult<()> {
            Ok(())
        }
        async fn grant_invoke(&self, _: &str, _: &str, _: &str) -> SchedulerResult<()> {
            Ok(())
        }
        async fn revoke_invoke(&self, _: &str, _: &str) -> SchedulerResult<()> {
            Ok(())
        }
    }

    fn state() -> ContinuationState {
        let mut state = ContinuationState::new(
            "rust",
            "https://api-gw.monday.com/automations/apps-events/42",
            SourceCredentials::new("token", "secret"),
        );
        state.last_id = Some("10".into());
        state
    }

    fn one_item_page() -> SearchPage {
        SearchPage {
            items: vec![SourceItem {
                id: "11".into(),
                text: "hello".into(),
                created_at: None,
                author_id: None,
            }],
            authors: Vec::new(),
            newest_id: Some("11".into()),
            next_token: None,
        }
    }

    fn engine(connector: FixedConnector, scheduler: Arc<dyn SchedulerClient>) -> CrawlEngine {
        CrawlEngine::new(
            Arc::new(connector),
            Arc::new(Accepting),
            scheduler,
            CrawlConfig::default(),
        )
    }

    async fn armed_scheduler() -> InMemoryScheduler {
        let scheduler = InMemoryScheduler::new();
        scheduler
            .upsert_trigger("42", &FireOnce::after_minutes(2, chrono::Utc::now()), true)
            .await
            .unwrap();
        scheduler
    }

    fn committed(scheduler: &InMemoryScheduler) -> ContinuationState {
        let trigger = scheduler.get_trigger("42").unwrap();
        ContinuationState::from_payload(&trigger.targets[0].input).unwrap()
    }

    #[tokio::test]
    async fn clean_scan_commits_advanced_cursor() {
        let scheduler = armed_scheduler().await;
        let engine = engine(
            FixedConnector(Ok(one_item_page())),
            Arc::new(scheduler.clone()),
        );

        let report = engine.invoke(state(), "crawl").await.unwrap();

        assert_eq!(report.phase, IntegrationPhase::Armed);
        assert_eq!(report.delivery.accepted, 1);
        assert_eq!(committed(&scheduler).last_id.as_deref(), Some("11"));
        assert_eq!(
            Some(scheduler.get_trigger("42").unwrap().fire_at),
            report.next_fire_at
        );
    }

    #[tokio::test]
    async fn aborted_scan_still_rearms_with_unchanged_cursor() {
        let scheduler = armed_scheduler().await;
        let engine = engine(FixedConnector(Err(500)), Arc::new(scheduler.clone()));

        let report = engine.invoke(state(), "crawl").await.unwrap();

        assert_eq!(report.phase, IntegrationPhase::Backoff);
        assert!(report.termination.is_abort());
        assert_eq!(committed(&scheduler), state());
        assert!(scheduler.get_trigger("42").unwrap().enabled);
    }

    #[tokio::test]
    async fn removed_trigger_ends_as_deprovisioned() {
        let scheduler = InMemoryScheduler::new();
        let engine = engine(
            FixedConnector(Ok(one_item_page())),
            Arc::new(scheduler.clone()),
        );

        let report = engine.invoke(state(), "crawl").await.unwrap();

        assert_eq!(report.phase, IntegrationPhase::Deprovisioned);
        assert_eq!(report.next_fire_at, None);
        assert!(scheduler.snapshot().triggers.is_empty());
    }

    #[tokio::test]
    async fn rearm_failure_is_surfaced() {
        let engine = engine(FixedConnector(Ok(one_item_page())), Arc::new(Broken));

        let err = engine.invoke(state(), "crawl").await.unwrap_err();

        assert!(matches!(err, CrawlError::Rearm { .. }));
    }

    #[tokio::test]
    async fn state_without_integration_id_is_rejected() {
        let scheduler = InMemoryScheduler::new();
        let engine = engine(
            FixedConnector(Ok(one_item_page())),
            Arc::new(scheduler.clone()),
        );
        let mut bad = state();
        bad.destination_url = "not a url".into();

        assert!(matches!(
            engine.invoke(bad, "crawl").await,
            Err(CrawlError::State(_))
        ));
        assert!(scheduler.snapshot().triggers.is_empty());
    }
}
