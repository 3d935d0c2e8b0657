//! Webhook delivery to automation endpoints
//!
//! Each item is POSTed as an automation trigger with its output fields and
//! the shared secret in the `Authorization` header.

use super::{DeliveryError, DeliveryReceipt, DeliverySink};
use crate::config::ConfigError;
use crate::types::DeliveryItem;
use serde::Serialize;

/// Webhook sink configuration
#[derive(Clone)]
pub struct WebhookConfig {
    /// Shared secret sent verbatim as the `Authorization` header
    pub shared_secret: String,
}

impl WebhookConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            shared_secret: std::env::var("MONDAY_ENDPOINT_SECRET")
                .map_err(|_| ConfigError::Missing("MONDAY_ENDPOINT_SECRET"))?,
        })
    }
}

#[derive(Debug, Serialize)]
struct TriggerBody<'a> {
    trigger: Trigger<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Trigger<'a> {
    output_fields: OutputFields<'a>,
}

#[derive(Debug, Serialize)]
struct OutputFields<'a> {
    tweet: TweetFields<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TweetFields<'a> {
    id: &'a str,
    text: &'a str,
    creation_date: &'a str,
    username: &'a str,
}

impl<'a> From<&'a DeliveryItem> for TriggerBody<'a> {
    fn from(item: &'a DeliveryItem) -> Self {
        TriggerBody {
            trigger: Trigger {
                output_fields: OutputFields {
                    tweet: TweetFields {
                        id: &item.id,
                        text: &item.text,
                        creation_date: item.creation_date(),
                        username: item.author_name.as_deref().unwrap_or_default(),
                    },
                },
            },
        }
    }
}

/// Delivers items to webhook destinations over HTTP
#[derive(Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookSink {
    pub fn new(config: WebhookConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::new(WebhookConfig::from_env()?))
    }

    pub(crate) fn body(item: &DeliveryItem) -> Result<Vec<u8>, DeliveryError> {
        serde_json::to_vec(&TriggerBody::from(item)).map_err(|e| DeliveryError::Encode(e.to_string()))
    }
}

#[async_trait::async_trait]
impl DeliverySink for WebhookSink {
    async fn deliver(
        &self,
        destination_url: &str,
        item: &DeliveryItem,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let response = self
            .client
            .post(destination_url)
            .header("Authorization", &self.config.shared_secret)
            .header("Content-Type", "application/json")
            .body(Self::body(item)?)
            .send()
            .await
            .map_err(|e| DeliveryError::Request(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        tracing::info!(
            item_id = %item.id,
            status = %status,
            body = %body,
            "Response from destination"
        );

        Ok(DeliveryReceipt {
            status: status.as_u16(),
        })
    }
}
