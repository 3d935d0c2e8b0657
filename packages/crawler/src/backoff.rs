//! Backoff/retry around a single page fetch
//!
//! Transient failures are retried in place after a fixed delay with the
//! identical request. Everything else is handed back to the scan loop, which
//! aborts and lets the next scheduled fire retry.

use crate::config::RetryCeiling;
use crate::search::{FailureClass, FetchError, SearchClient, SearchPage, SearchRequest};
use std::time::Duration;

/// Retry policy for transient fetch failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub ceiling: RetryCeiling,
}

impl RetryPolicy {
    pub fn new(delay: Duration, ceiling: RetryCeiling) -> Self {
        Self { delay, ceiling }
    }
}

/// Fetch one page, retrying transient failures.
///
/// Returns the page, or the error that ended the attempts: an abort-class
/// error immediately, a transient one once the ceiling is reached.
pub async fn fetch_with_retry(
    client: &dyn SearchClient,
    request: &SearchRequest,
    policy: &RetryPolicy,
) -> Result<SearchPage, FetchError> {
    let mut retries = 0u32;

    loop {
        match client.search(request).await {
            Ok(page) => return Ok(page),
            Err(e) if e.class() == FailureClass::Transient && policy.ceiling.allows(retries) => {
                retries += 1;
                tracing::warn!(
                    error = %e,
                    retry = retries,
                    delay_secs = policy.delay.as_secs(),
                    "Transient search failure, sleeping before retrying the same page"
                );
                tokio::time::sleep(policy.delay).await;
            }
            Err(e) => {
                if e.class() == FailureClass::Transient {
                    tracing::error!(error = %e, retries, "Transient retry ceiling reached");
                } else {
                    tracing::error!(error = %e, "Search failed");
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

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

    fn request() -> SearchRequest {
        SearchRequest {
            query: "rust".into(),
            page_size: 100,
            next_token: Some("abc".into()),
            since_id: None,
        }
    }

    fn reset() -> Result<SearchPage, FetchError> {
        Err(FetchError::Transient("connection reset by peer".into()))
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_retries_identical_request() {
        let page = SearchPage {
            newest_id: Some("5".into()),
            ..Default::default()
        };
        let client = Scripted::new(vec![reset(), reset(), Ok(page.clone())]);
        let policy = RetryPolicy::new(Duration::from_secs(10), RetryCeiling::Limited(5));

        let started = tokio::time::Instant::now();
        let result = fetch_with_retry(&client, &request(), &policy).await.unwrap();

        assert_eq!(result, page);
        assert!(started.elapsed() >= Duration::from_secs(20));
        assert!(started.elapsed() < Duration::from_secs(21));
        let requests = client.requests.lock();
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| *r == request()));
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_stops_transient_retries() {
        let client = Scripted::new(vec![reset(), reset(), reset(), reset()]);
        let policy = RetryPolicy::new(Duration::from_secs(10), RetryCeiling::Limited(2));

        let err = fetch_with_retry(&client, &request(), &policy)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Transient(_)));
        assert_eq!(client.requests.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_failure_is_not_retried() {
        let client = Scripted::new(vec![Err(FetchError::Status {
            status: 401,
            body: "Unauthorized".into(),
        })]);
        let policy = RetryPolicy::new(Duration::from_secs(10), RetryCeiling::Unbounded);

        let started = tokio::time::Instant::now();
        let err = fetch_with_retry(&client, &request(), &policy)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Status { status: 401, .. }));
        assert_eq!(client.requests.lock().len(), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
