//! Continuation state - the record describing where a scan is
//!
//! The state travels as the JSON payload of the integration's trigger and
//! comes back as the input of the next crawl invocation. Field names match
//! the payloads already attached to live triggers.

use crate::search::SearchRequest;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Error type for continuation state handling
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Invalid destination URL '{url}': {reason}")]
    InvalidDestination { url: String, reason: String },

    #[error("Invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

/// User-context credentials for the search source
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCredentials {
    #[serde(rename = "twitterToken")]
    pub token: String,

    #[serde(rename = "twitterSecret")]
    pub secret: String,
}

impl SourceCredentials {
    pub fn new(token: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for SourceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceCredentials")
            .field("token", &"<redacted>")
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Stable identifier of an integration and of its trigger.
///
/// Derived from the last path segment of the destination URL, so the same
/// destination always maps onto the same trigger name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntegrationId(String);

impl IntegrationId {
    pub fn from_destination_url(destination_url: &str) -> Result<Self, StateError> {
        let invalid = |reason: &str| StateError::InvalidDestination {
            url: destination_url.to_string(),
            reason: reason.to_string(),
        };

        let url = url::Url::parse(destination_url).map_err(|e| invalid(&e.to_string()))?;
        let segment = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .ok_or_else(|| invalid("no trailing path segment"))?;

        Ok(Self(segment.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Id of the single target attached to this integration's trigger
    pub fn target_id(&self) -> String {
        format!("{}-target", self.0)
    }
}

impl From<&str> for IntegrationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for IntegrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything a crawl invocation needs to resume a subscription's scan.
///
/// `next_token` present means a paginated scan is mid-flight and must be
/// continued with that token; `last_id` only filters a fresh scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationState {
    pub query: String,

    #[serde(rename = "webhookUrl", alias = "destinationUrl")]
    pub destination_url: String,

    #[serde(flatten)]
    pub credentials: SourceCredentials,

    #[serde(rename = "lastId", default)]
    pub last_id: Option<String>,

    #[serde(default)]
    pub next_token: Option<String>,
}

impl ContinuationState {
    /// A fresh state with no scan progress
    pub fn new(
        query: impl Into<String>,
        destination_url: impl Into<String>,
        credentials: SourceCredentials,
    ) -> Self {
        Self {
            query: query.into(),
            destination_url: destination_url.into(),
            credentials,
            last_id: None,
            next_token: None,
        }
    }

    pub fn from_payload(payload: &str) -> Result<Self, StateError> {
        Ok(serde_json::from_str(payload)?)
    }

    pub fn to_payload(&self) -> Result<String, StateError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn integration_id(&self) -> Result<IntegrationId, StateError> {
        IntegrationId::from_destination_url(&self.destination_url)
    }

    pub fn is_mid_scan(&self) -> bool {
        self.next_token.is_some()
    }

    /// Build the request for the next page.
    ///
    /// A pagination token takes precedence; the since-cursor is only sent
    /// when no token is present.
    pub fn next_request(&self, query: &str, page_size: u32) -> SearchRequest {
        match &self.next_token {
            Some(token) => SearchRequest {
                query: query.to_string(),
                page_size,
                next_token: Some(token.clone()),
                since_id: None,
            },
            None => SearchRequest {
                query: query.to_string(),
                page_size,
                next_token: None,
                since_id: self.last_id.clone(),
            },
        }
    }

    /// Apply one fetched page's metadata.
    ///
    /// `last_id` only moves forward; `next_token` is replaced wholesale so a
    /// page without a token ends the paginated scan.
    pub fn advance(&mut self, newest_id: Option<&str>, next_token: Option<String>) {
        if let Some(newest) = newest_id {
            let is_newer = match self.last_id.as_deref() {
                Some(current) => compare_ids(newest, current) == Ordering::Greater,
                None => true,
            };
            if is_newer {
                self.last_id = Some(newest.to_string());
            }
        }
        self.next_token = next_token;
    }

    /// Mark the scan complete after an empty page
    pub fn complete(&mut self) {
        self.next_token = None;
    }
}

/// Order source ids. Ids are decimal snowflakes that outgrow `u64`
/// comparison as strings, so compare by length first.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    let both_numeric =
        a.bytes().all(|c| c.is_ascii_digit()) && b.bytes().all(|c| c.is_ascii_digit());

    if both_numeric {
        a.len().cmp(&b.len()).then_with(|| a.cmp(b))
    } else {
        a.cmp(b)
    }
}
