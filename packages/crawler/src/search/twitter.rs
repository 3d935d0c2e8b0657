//! Twitter API v2 recent search client
//!
//! Uses user-context OAuth 1.0a: the application's consumer keys come from
//! the environment, the access token pair from the continuation state.

use super::oauth::encode;
use super::{
    FetchError, MAX_PAGE_SIZE, MIN_PAGE_SIZE, OAuthSigner, SearchClient, SearchConnector,
    SearchPage, SearchRequest,
};
use crate::config::ConfigError;
use crate::state::SourceCredentials;
use crate::types::{Author, SourceItem};
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;

const DEFAULT_API_BASE_URL: &str = "https://api.twitter.com";
const SEARCH_PATH: &str = "/2/tweets/search/recent";

/// Application-level Twitter configuration
#[derive(Clone)]
pub struct TwitterConfig {
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
}

impl std::fmt::Debug for TwitterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwitterConfig")
            .field("api_key", &self.api_key)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl TwitterConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            api_key: std::env::var("TWITTER_API_KEY")
                .map_err(|_| ConfigError::Missing("TWITTER_API_KEY"))?,
            api_secret: std::env::var("TWITTER_SECRET_KEY")
                .map_err(|_| ConfigError::Missing("TWITTER_SECRET_KEY"))?,
            base_url: std::env::var("TWITTER_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string()),
        })
    }
}

/// Builds one [`TwitterSearchClient`] per set of user credentials, sharing
/// the HTTP connection pool
#[derive(Debug, Clone)]
pub struct TwitterConnector {
    config: TwitterConfig,
    http: reqwest::Client,
}

impl TwitterConnector {
    pub fn new(config: TwitterConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::new(TwitterConfig::from_env()?))
    }
}

impl SearchConnector for TwitterConnector {
    fn connect(&self, credentials: &SourceCredentials) -> Arc<dyn SearchClient> {
        Arc::new(TwitterSearchClient {
            http: self.http.clone(),
            url: format!("{}{}", self.config.base_url.trim_end_matches('/'), SEARCH_PATH),
            signer: OAuthSigner::new(
                &self.config.api_key,
                &self.config.api_secret,
                &credentials.token,
                &credentials.secret,
            ),
        })
    }
}

/// Recent-search client for one user
#[derive(Debug, Clone)]
pub struct TwitterSearchClient {
    http: reqwest::Client,
    url: String,
    signer: OAuthSigner,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Option<Vec<SourceItem>>,
    #[serde(default)]
    includes: Option<Includes>,
    #[serde(default)]
    meta: Option<Meta>,
}

#[derive(Debug, Default, Deserialize)]
struct Includes {
    #[serde(default)]
    users: Vec<Author>,
}

#[derive(Debug, Default, Deserialize)]
struct Meta {
    #[serde(default)]
    newest_id: Option<String>,
    #[serde(default)]
    next_token: Option<String>,
}

impl From<SearchResponse> for SearchPage {
    fn from(response: SearchResponse) -> Self {
        let meta = response.meta.unwrap_or_default();
        SearchPage {
            items: response.data.unwrap_or_default(),
            authors: response.includes.unwrap_or_default().users,
            newest_id: meta.newest_id,
            next_token: meta.next_token,
        }
    }
}

/// Query parameters for one page
pub(crate) fn query_params(request: &SearchRequest) -> Vec<(String, String)> {
    let page_size = request.page_size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE);
    let mut params = vec![
        ("query".to_string(), request.query.clone()),
        ("max_results".to_string(), page_size.to_string()),
        ("expansions".to_string(), "author_id".to_string()),
        (
            "tweet.fields".to_string(),
            "id,text,created_at,author_id".to_string(),
        ),
        ("user.fields".to_string(), "username".to_string()),
    ];

    if let Some(token) = &request.next_token {
        params.push(("next_token".to_string(), token.clone()));
    } else if let Some(since_id) = &request.since_id {
        params.push(("since_id".to_string(), since_id.clone()));
    }

    params
}

#[async_trait::async_trait]
impl SearchClient for TwitterSearchClient {
    async fn search(&self, request: &SearchRequest) -> Result<SearchPage, FetchError> {
        let params = query_params(request);
        let authorization = self.signer.authorization("GET", &self.url, &params);

        tracing::debug!(
            query = %request.query,
            next_token = ?request.next_token,
            since_id = ?request.since_id,
            "Calling search source"
        );

        // Encoded the same way the signature base string encodes them
        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let response = self
            .http
            .get(format!("{}?{}", self.url, query))
            .header("Authorization", authorization)
            .send()
            .await
            .map_err(FetchError::from_transport)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let reset_at = response
                .headers()
                .get("x-rate-limit-reset")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<i64>().ok());
            return Err(FetchError::RateLimited { reset_at });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await.map_err(FetchError::from_transport)?;
        let parsed: SearchResponse = serde_json::from_str(&body)
            .map_err(|e| FetchError::InvalidResponse(e.to_string()))?;

        Ok(parsed.into())
    }
}
