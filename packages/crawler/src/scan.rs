//! Incremental scan loop
//!
//! Pages through the source starting from a [`ContinuationState`], delivering
//! each page before fetching the next. The loop owns one mutable state value
//! and stops on the first of: an empty page, a page with no continuation
//! token, the page budget, or a fetch failure that outlived its retries.

use crate::backoff::{RetryPolicy, fetch_with_retry};
use crate::config::CrawlConfig;
use crate::delivery::{DeliveryReport, DeliverySink, deliver_page};
use crate::search::SearchClient;
use crate::state::ContinuationState;

/// Why a scan stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The source has nothing more for this query
    Exhausted,
    /// `max_pages` were fetched; the token carries over to the next fire
    BudgetSpent,
    /// A fetch failed; the state is as of the last successful page
    Aborted { reason: String },
}

impl Termination {
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}

/// Outcome of one scan
#[derive(Debug, Clone)]
pub struct ScanReport {
    /// State to commit into the next trigger
    pub state: ContinuationState,
    pub pages_fetched: u32,
    pub delivery: DeliveryReport,
    pub termination: Termination,
}

/// Run one bounded scan
#[tracing::instrument(
    name = "scan",
    skip_all,
    fields(destination = %state.destination_url, max_pages = config.max_pages)
)]
pub async fn run_scan(
    client: &dyn SearchClient,
    sink: &dyn DeliverySink,
    mut state: ContinuationState,
    config: &CrawlConfig,
) -> ScanReport {
    let query = config.effective_query(&state.query);
    let policy = RetryPolicy::new(config.retry_delay, config.max_transient_retries);
    let mut pages_fetched = 0u32;
    let mut delivery = DeliveryReport::default();

    let termination = loop {
        if pages_fetched >= config.max_pages {
            break Termination::BudgetSpent;
        }

        let request = state.next_request(&query, config.page_size);
        let page = match fetch_with_retry(client, &request, &policy).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    last_id = ?state.last_id,
                    next_token = ?state.next_token,
                    "Aborting scan, cursor left as is"
                );
                break Termination::Aborted {
                    reason: e.to_string(),
                };
            }
        };
        pages_fetched += 1;

        if page.is_empty() {
            tracing::info!(page = pages_fetched, last_id = ?state.last_id, "No more items");
            state.advance(page.newest_id.as_deref(), None);
            state.complete();
            break Termination::Exhausted;
        }

        let items = page.delivery_items();
        let report = deliver_page(sink, &state.destination_url, &items).await;
        delivery.merge(&report);

        state.advance(page.newest_id.as_deref(), page.next_token.clone());
        tracing::info!(
            page = pages_fetched,
            items = items.len(),
            accepted = report.accepted,
            last_id = ?state.last_id,
            next_token = ?state.next_token,
            "Delivered page"
        );

        if !state.is_mid_scan() {
            break Termination::Exhausted;
        }
    };

    ScanReport {
        state,
        pages_fetched,
        delivery,
        termination,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryCeiling;
    use crate::delivery::{DeliveryError, DeliveryReceipt};
    use crate::search::{FetchError, SearchPage, SearchRequest};
    use crate::state::SourceCredentials;
    use crate::types::{DeliveryItem, SourceItem};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;

    struct Scripted {
        responses: Mutex<VecDeque<Result<SearchPage, FetchError>>>,
        requests: Mutex<Vec<SearchRequest>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<SearchPage, FetchError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl SearchClient for Scripted {
        async fn search(&self, request: &SearchRequest) -> Result<SearchPage, FetchError> {
            self.requests.lock().push(request.clone());
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(SearchPage::default()))
        }
    }

    #[derive(Default)]
    struct Recorder {
        delivered: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl DeliverySink for Recorder {
        async fn deliver(
            &self,
            _destination_url: &str,
            item: &DeliveryItem,
        ) -> Result<DeliveryReceipt, DeliveryError> {
            self.delivered.lock().push(item.id.clone());
            Ok(DeliveryReceipt { status: 200 })
        }
    }

    fn state(last_id: Option<&str>, next_token: Option<&str>) -> ContinuationState {
        let mut state = ContinuationState::new(
            "rust",
            "https://api-gw.monday.com/automations/apps-events/42",
            SourceCredentials::new("token", "secret"),
        );
        state.last_id = last_id.map(str::to_string);
        state.next_token = next_token.map(str::to_string);
        state
    }

    fn page(ids: std::ops::RangeInclusive<u64>, next_token: Option<&str>) -> SearchPage {
        let items: Vec<SourceItem> = ids
            .clone()
            .rev()
            .map(|id| SourceItem {
                id: id.to_string(),
                text: format!("item {}", id),
                created_at: None,
                author_id: None,
            })
            .collect();
        SearchPage {
            newest_id: Some(ids.end().to_string()),
            items,
            authors: Vec::new(),
            next_token: next_token.map(str::to_string),
        }
    }

    fn config(max_pages: u32) -> CrawlConfig {
        CrawlConfig {
            max_pages,
            retry_delay: Duration::from_secs(10),
            max_transient_retries: RetryCeiling::Limited(5),
            ..CrawlConfig::default()
        }
    }

    #[tokio::test]
    async fn full_page_with_token_spends_budget_and_carries_token() {
        let client = Scripted::new(vec![Ok(page(1001..=1100, Some("abc")))]);
        let sink = Recorder::default();

        let report = run_scan(&client, &sink, state(None, None), &config(1)).await;

        assert_eq!(report.termination, Termination::BudgetSpent);
        assert_eq!(report.pages_fetched, 1);
        assert_eq!(report.delivery.accepted, 100);
        assert_eq!(sink.delivered.lock().len(), 100);
        assert_eq!(report.state.last_id.as_deref(), Some("1100"));
        assert_eq!(report.state.next_token.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn empty_page_clears_token_and_keeps_last_id() {
        let client = Scripted::new(vec![Ok(SearchPage::default())]);
        let sink = Recorder::default();

        let report = run_scan(&client, &sink, state(Some("900"), Some("abc")), &config(5)).await;

        assert_eq!(report.termination, Termination::Exhausted);
        assert_eq!(report.pages_fetched, 1);
        assert_eq!(report.state.last_id.as_deref(), Some("900"));
        assert!(report.state.next_token.is_none());
        assert!(sink.delivered.lock().is_empty());
    }

    #[tokio::test]
    async fn token_takes_precedence_over_since_cursor() {
        let client = Scripted::new(vec![Ok(SearchPage::default())]);
        let sink = Recorder::default();

        run_scan(&client, &sink, state(Some("900"), Some("abc")), &config(1)).await;

        let requests = client.requests.lock();
        assert_eq!(requests[0].next_token.as_deref(), Some("abc"));
        assert!(requests[0].since_id.is_none());
        assert!(requests[0].query.starts_with("rust lang:en"));
    }

    #[tokio::test]
    async fn budget_bounds_the_number_of_fetches() {
        let client = Scripted::new(vec![
            Ok(page(31..=40, Some("t1"))),
            Ok(page(21..=30, Some("t2"))),
            Ok(page(11..=20, Some("t3"))),
            Ok(page(1..=10, Some("t4"))),
        ]);
        let sink = Recorder::default();

        let report = run_scan(&client, &sink, state(None, None), &config(3)).await;

        assert_eq!(report.termination, Termination::BudgetSpent);
        assert_eq!(client.requests.lock().len(), 3);
        assert_eq!(report.state.next_token.as_deref(), Some("t3"));
        // Pagination walks backwards in time, the high-water mark is the first page's
        assert_eq!(report.state.last_id.as_deref(), Some("40"));
    }

    #[tokio::test]
    async fn page_without_token_completes_the_scan() {
        let client = Scripted::new(vec![Ok(page(5..=7, None))]);
        let sink = Recorder::default();

        let report = run_scan(&client, &sink, state(Some("4"), None), &config(10)).await;

        assert_eq!(report.termination, Termination::Exhausted);
        assert_eq!(client.requests.lock().len(), 1);
        assert_eq!(client.requests.lock()[0].since_id.as_deref(), Some("4"));
        assert_eq!(report.state.last_id.as_deref(), Some("7"));
        assert_eq!(*sink.delivered.lock(), vec!["7", "6", "5"]);
    }

    #[tokio::test]
    async fn abort_keeps_the_last_good_cursor() {
        let client = Scripted::new(vec![
            Ok(page(100..=110, Some("t1"))),
            Err(FetchError::Status {
                status: 503,
                body: "over capacity".into(),
            }),
        ]);
        let sink = Recorder::default();

        let report = run_scan(&client, &sink, state(Some("50"), None), &config(5)).await;

        assert!(report.termination.is_abort());
        assert_eq!(report.pages_fetched, 1);
        assert_eq!(report.state.last_id.as_deref(), Some("110"));
        assert_eq!(report.state.next_token.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn abort_on_first_page_leaves_state_untouched() {
        let client = Scripted::new(vec![Err(FetchError::RateLimited { reset_at: None })]);
        let sink = Recorder::default();
        let before = state(Some("50"), Some("abc"));

        let report = run_scan(&client, &sink, before.clone(), &config(1)).await;

        assert!(report.termination.is_abort());
        assert_eq!(report.pages_fetched, 0);
        assert_eq!(report.state, before);
    }

    #[tokio::test]
    async fn stale_page_never_regresses_last_id() {
        let mut stale = page(1..=5, None);
        stale.newest_id = Some("5".into());
        let client = Scripted::new(vec![Ok(stale)]);
        let sink = Recorder::default();

        let report = run_scan(&client, &sink, state(Some("100"), None), &config(1)).await;

        assert_eq!(report.state.last_id.as_deref(), Some("100"));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_retries_do_not_consume_budget() {
        let client = Scripted::new(vec![
            Err(FetchError::Transient("connection reset".into())),
            Ok(page(1..=3, Some("t1"))),
        ]);
        let sink = Recorder::default();

        let report = run_scan(&client, &sink, state(None, None), &config(1)).await;

        assert_eq!(report.pages_fetched, 1);
        assert_eq!(report.termination, Termination::BudgetSpent);
        assert_eq!(client.requests.lock().len(), 2);
    }
}
