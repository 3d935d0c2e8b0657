//! Crawl and lifecycle configuration

use crate::search::{MAX_PAGE_SIZE, MIN_PAGE_SIZE};
use std::time::Duration;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Ceiling on in-place retries of a transiently failing page fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCeiling {
    Limited(u32),
    Unbounded,
}

impl RetryCeiling {
    pub fn allows(&self, retries_so_far: u32) -> bool {
        match self {
            Self::Limited(max) => retries_so_far < *max,
            Self::Unbounded => true,
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "unbounded" | "unlimited" | "none" => Some(Self::Unbounded),
            other => other.parse().ok().map(Self::Limited),
        }
    }
}

/// Configuration of a crawl invocation
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Pages one invocation may fetch before handing off to the next fire
    pub max_pages: u32,

    /// Items requested per page
    pub page_size: u32,

    /// Sleep between in-place retries of a transient failure
    pub retry_delay: Duration,

    pub max_transient_retries: RetryCeiling,

    /// Minutes until the rearmed trigger fires
    pub rearm_delay_minutes: u32,

    /// Filter appended to every saved query
    pub query_suffix: String,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_pages: 1,
            page_size: MAX_PAGE_SIZE,
            retry_delay: Duration::from_secs(10),
            max_transient_retries: RetryCeiling::Limited(5),
            rearm_delay_minutes: 2,
            query_suffix: "lang:en -is:retweet -is:reply -has:media -has:links".to_string(),
        }
    }
}

impl CrawlConfig {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_pages = parse_env("CRAWL_MAX_PAGES")?.unwrap_or(defaults.max_pages);
        if max_pages == 0 {
            return Err(ConfigError::Invalid {
                name: "CRAWL_MAX_PAGES",
                value: "0".to_string(),
            });
        }

        let page_size = parse_env::<u32>("CRAWL_PAGE_SIZE")?
            .map(|size| size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE))
            .unwrap_or(defaults.page_size);

        let retry_delay = parse_env("CRAWL_RETRY_DELAY_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.retry_delay);

        let max_transient_retries = match std::env::var("CRAWL_MAX_TRANSIENT_RETRIES") {
            Ok(value) => RetryCeiling::parse(&value).ok_or(ConfigError::Invalid {
                name: "CRAWL_MAX_TRANSIENT_RETRIES",
                value,
            })?,
            Err(_) => defaults.max_transient_retries,
        };

        let rearm_delay_minutes =
            parse_env("CRAWL_REARM_DELAY_MINUTES")?.unwrap_or(defaults.rearm_delay_minutes);

        let query_suffix = std::env::var("CRAWL_QUERY_SUFFIX").unwrap_or(defaults.query_suffix);

        Ok(Self {
            max_pages,
            page_size,
            retry_delay,
            max_transient_retries,
            rearm_delay_minutes,
            query_suffix,
        })
    }

    /// The query sent to the source for a saved filter
    pub fn effective_query(&self, query: &str) -> String {
        let suffix = self.query_suffix.trim();
        if suffix.is_empty() {
            query.trim().to_string()
        } else {
            format!("{} {}", query.trim(), suffix)
        }
    }
}

/// Configuration of integration provisioning
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Entrypoint every trigger targets (the crawl function ARN on AWS)
    pub crawl_entrypoint: String,

    /// Minutes until the first fire after subscribing
    pub initial_delay_minutes: u32,

    /// Destination URLs are `<base>/<webhook id>`
    pub destination_base_url: String,
}

impl LifecycleConfig {
    pub fn new(crawl_entrypoint: impl Into<String>) -> Self {
        Self {
            crawl_entrypoint: crawl_entrypoint.into(),
            initial_delay_minutes: 2,
            destination_base_url: "https://api-gw.monday.com/automations/apps-events".to_string(),
        }
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let crawl_entrypoint = std::env::var("CRAWL_LAMBDA_ARN")
            .map_err(|_| ConfigError::Missing("CRAWL_LAMBDA_ARN"))?;
        let mut config = Self::new(crawl_entrypoint);

        if let Some(delay) = parse_env("INITIAL_DELAY_MINUTES")? {
            config.initial_delay_minutes = delay;
        }
        if let Ok(base) = std::env::var("DESTINATION_BASE_URL") {
            config.destination_base_url = base;
        }

        Ok(config)
    }

    pub fn destination_url(&self, webhook_id: &str) -> String {
        format!(
            "{}/{}",
            self.destination_base_url.trim_end_matches('/'),
            webhook_id
        )
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(None),
    }
}
