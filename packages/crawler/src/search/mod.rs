//! Page fetcher - one page of matching items from the search source
//!
//! The source is reached through [`SearchClient`]; a [`SearchConnector`]
//! builds a client for the credentials carried in a continuation state.

mod oauth;
pub mod twitter;

pub use oauth::OAuthSigner;
pub use twitter::{TwitterConfig, TwitterConnector, TwitterSearchClient};

use crate::state::SourceCredentials;
use crate::types::{Author, DeliveryItem, SourceItem};
use std::sync::Arc;

/// Largest page the source serves; also the page size used by scans
pub const MAX_PAGE_SIZE: u32 = 100;

/// Smallest page size the source accepts
pub const MIN_PAGE_SIZE: u32 = 10;

/// One page request.
///
/// At most one of `next_token` and `since_id` is set, see
/// [`ContinuationState::next_request`](crate::state::ContinuationState::next_request).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub page_size: u32,
    pub next_token: Option<String>,
    pub since_id: Option<String>,
}

/// One page of results
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    /// Items in source order; empty when the source returned no data
    pub items: Vec<SourceItem>,

    /// Author expansion for the items
    pub authors: Vec<Author>,

    /// Newest item id within this page
    pub newest_id: Option<String>,

    /// Token for the following page, if any
    pub next_token: Option<String>,
}

impl SearchPage {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Join the items with their authors, preserving source order
    pub fn delivery_items(&self) -> Vec<DeliveryItem> {
        self.items
            .iter()
            .cloned()
            .map(|item| DeliveryItem::join(item, &self.authors))
            .collect()
    }
}

/// Whether a failed fetch may be retried in place
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retry the identical request after a short sleep
    Transient,
    /// Abort the scan and leave the retry to the next scheduled fire
    Abort,
}

/// Error type for page fetches
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Transient network error: {0}")]
    Transient(String),

    #[error("Rate limited by search source (reset at {reset_at:?})")]
    RateLimited { reset_at: Option<i64> },

    #[error("Search source returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected search response: {0}")]
    InvalidResponse(String),

    #[error("Unknown fetch error: {0}")]
    Unknown(String),
}

impl FetchError {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Transient(_) => FailureClass::Transient,
            _ => FailureClass::Abort,
        }
    }

    /// Classify a transport error from the HTTP client.
    ///
    /// Connection resets and their relatives surface as `io::Error`s deep in
    /// the source chain.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || has_transient_io_source(&err) {
            Self::Transient(err.to_string())
        } else {
            Self::Unknown(err.to_string())
        }
    }
}

fn has_transient_io_source(err: &(dyn std::error::Error + 'static)) -> bool {
    use std::io::ErrorKind;

    let mut source = err.source();
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>()
            && matches!(
                io.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::TimedOut
                    | ErrorKind::UnexpectedEof
            )
        {
            return true;
        }
        source = inner.source();
    }
    false
}

/// A search source bound to one set of credentials
#[async_trait::async_trait]
pub trait SearchClient: Send + Sync {
    /// Fetch exactly one page
    async fn search(&self, request: &SearchRequest) -> Result<SearchPage, FetchError>;
}

/// Builds search clients for the credentials stored in a continuation state
pub trait SearchConnector: Send + Sync {
    fn connect(&self, credentials: &SourceCredentials) -> Arc<dyn SearchClient>;
}
