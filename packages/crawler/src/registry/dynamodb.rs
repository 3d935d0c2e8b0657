//! DynamoDB registry
//!
//! Tables: `integrations` keyed by `url`, `clients` keyed by `userId`.
//! Names can be overridden with `INTEGRATIONS_TABLE` / `CLIENTS_TABLE`.

use super::{Registry, RegistryError, RegistryResult};
use crate::state::SourceCredentials;
use crate::types::{Client, Integration};
use aws_config::SdkConfig;
use aws_sdk_dynamodb::types::AttributeValue;
use std::collections::HashMap;

const INTEGRATIONS_TABLE: &str = "integrations";
const CLIENTS_TABLE: &str = "clients";

pub struct DynamoDbRegistry {
    client: aws_sdk_dynamodb::Client,
    integrations_table: String,
    clients_table: String,
}

impl std::fmt::Debug for DynamoDbRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoDbRegistry")
            .field("integrations_table", &self.integrations_table)
            .field("clients_table", &self.clients_table)
            .finish()
    }
}

impl DynamoDbRegistry {
    pub fn new(aws_config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_dynamodb::Client::new(aws_config),
            integrations_table: std::env::var("INTEGRATIONS_TABLE")
                .unwrap_or_else(|_| INTEGRATIONS_TABLE.to_string()),
            clients_table: std::env::var("CLIENTS_TABLE")
                .unwrap_or_else(|_| CLIENTS_TABLE.to_string()),
        }
    }

    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(&config)
    }
}

type Item = HashMap<String, AttributeValue>;

fn string_attr(item: &Item, key: &str) -> Option<String> {
    item.get(key).and_then(|v| v.as_s().ok()).cloned()
}

fn required_attr(item: &Item, key: &str) -> RegistryResult<String> {
    string_attr(item, key)
        .ok_or_else(|| RegistryError::Serialization(format!("Missing attribute {}", key)))
}

fn integration_to_item(integration: &Integration) -> Item {
    let mut item = HashMap::new();
    item.insert(
        "url".into(),
        AttributeValue::S(integration.destination_url.clone()),
    );
    item.insert("userId".into(), AttributeValue::S(integration.user_id.clone()));
    item.insert("query".into(), AttributeValue::S(integration.query.clone()));
    item
}

fn item_to_integration(item: &Item) -> RegistryResult<Integration> {
    Ok(Integration {
        destination_url: required_attr(item, "url")?,
        user_id: required_attr(item, "userId")?,
        query: required_attr(item, "query")?,
    })
}

fn client_to_item(client: &Client) -> Item {
    let mut item = HashMap::new();
    item.insert("userId".into(), AttributeValue::S(client.user_id.clone()));
    if let Some(account_id) = &client.account_id {
        item.insert("accountId".into(), AttributeValue::S(account_id.clone()));
    }
    if let Some(credentials) = &client.credentials {
        item.insert(
            "twitterToken".into(),
            AttributeValue::S(credentials.token.clone()),
        );
        item.insert(
            "twitterSecret".into(),
            AttributeValue::S(credentials.secret.clone()),
        );
    }
    item
}

fn item_to_client(item: &Item) -> RegistryResult<Client> {
    let credentials = match (
        string_attr(item, "twitterToken"),
        string_attr(item, "twitterSecret"),
    ) {
        (Some(token), Some(secret)) => Some(SourceCredentials::new(token, secret)),
        _ => None,
    };

    Ok(Client {
        user_id: required_attr(item, "userId")?,
        account_id: string_attr(item, "accountId"),
        credentials,
    })
}

#[async_trait::async_trait]
impl Registry for DynamoDbRegistry {
    async fn put_integration(&self, integration: &Integration) -> RegistryResult<()> {
        self.client
            .put_item()
            .table_name(&self.integrations_table)
            .set_item(Some(integration_to_item(integration)))
            .send()
            .await
            .map_err(|e| RegistryError::Database(e.to_string()))?;
        Ok(())
    }

    async fn get_integration(&self, destination_url: &str) -> RegistryResult<Option<Integration>> {
        let result = self
            .client
            .get_item()
            .table_name(&self.integrations_table)
            .key("url", AttributeValue::S(destination_url.to_string()))
            .send()
            .await
            .map_err(|e| RegistryError::Database(e.to_string()))?;

        match result.item {
            Some(item) => Ok(Some(item_to_integration(&item)?)),
            None => Ok(None),
        }
    }

    async fn delete_integration(&self, destination_url: &str) -> RegistryResult<()> {
        self.client
            .delete_item()
            .table_name(&self.integrations_table)
            .key("url", AttributeValue::S(destination_url.to_string()))
            .send()
            .await
            .map_err(|e| RegistryError::Database(e.to_string()))?;
        Ok(())
    }

    async fn put_client(&self, client: &Client) -> RegistryResult<()> {
        self.client
            .put_item()
            .table_name(&self.clients_table)
            .set_item(Some(client_to_item(client)))
            .send()
            .await
            .map_err(|e| RegistryError::Database(e.to_string()))?;
        Ok(())
    }

    async fn get_client(&self, user_id: &str) -> RegistryResult<Option<Client>> {
        let result = self
            .client
            .get_item()
            .table_name(&self.clients_table)
            .key("userId", AttributeValue::S(user_id.to_string()))
            .send()
            .await
            .map_err(|e| RegistryError::Database(e.to_string()))?;

        match result.item {
            Some(item) => Ok(Some(item_to_client(&item)?)),
            None => Ok(None),
        }
    }
}
