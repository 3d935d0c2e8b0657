//! Redis-backed storage for the crawl service
//!
//! Holds the integration and client records (the registry) and a snapshot
//! of the trigger table, so armed triggers survive a restart.

use populate_crawler::scheduler::SchedulerSnapshot;
use populate_crawler::{Client, Integration, Registry, RegistryError, RegistryResult};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Serialize, de::DeserializeOwned};

const SNAPSHOT_KEY: &str = "populate:scheduler:snapshot";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StorageError> for RegistryError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Serialization(e) => RegistryError::Serialization(e.to_string()),
            StorageError::Redis(e) => RegistryError::Database(e.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct RedisStorage {
    conn: ConnectionManager,
}

impl RedisStorage {
    pub async fn new(redis_url: &str) -> Result<Self, StorageError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    fn integration_key(destination_url: &str) -> String {
        format!("populate:integration:{}", destination_url)
    }

    fn client_key(user_id: &str) -> String {
        format!("populate:client:{}", user_id)
    }

    async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let json = serde_json::to_string(value)?;
        self.conn.clone().set::<_, _, ()>(key, json).await?;
        Ok(())
    }

    async fn fetch<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let json: Option<String> = self.conn.clone().get(key).await?;
        Ok(json.map(|j| serde_json::from_str(&j)).transpose()?)
    }

    pub async fn save_snapshot(&self, snapshot: &SchedulerSnapshot) -> Result<(), StorageError> {
        self.put(SNAPSHOT_KEY, snapshot).await
    }

    pub async fn load_snapshot(&self) -> Result<Option<SchedulerSnapshot>, StorageError> {
        self.fetch(SNAPSHOT_KEY).await
    }
}

#[async_trait::async_trait]
impl Registry for RedisStorage {
    async fn put_integration(&self, integration: &Integration) -> RegistryResult<()> {
        let key = Self::integration_key(&integration.destination_url);
        Ok(self.put(&key, integration).await?)
    }

    async fn get_integration(&self, destination_url: &str) -> RegistryResult<Option<Integration>> {
        Ok(self.fetch(&Self::integration_key(destination_url)).await?)
    }

    async fn delete_integration(&self, destination_url: &str) -> RegistryResult<()> {
        let key = Self::integration_key(destination_url);
        self.conn
            .clone()
            .del::<_, ()>(key)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    async fn put_client(&self, client: &Client) -> RegistryResult<()> {
        Ok(self.put(&Self::client_key(&client.user_id), client).await?)
    }

    async fn get_client(&self, user_id: &str) -> RegistryResult<Option<Client>> {
        Ok(self.fetch(&Self::client_key(user_id)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(
            RedisStorage::integration_key("https://hooks.example/42"),
            "populate:integration:https://hooks.example/42"
        );
        assert_eq!(RedisStorage::client_key("7"), "populate:client:7");
    }

    #[test]
    fn bad_record_maps_to_serialization_error() {
        let parse = serde_json::from_str::<Client>("{").unwrap_err();
        let err: RegistryError = StorageError::from(parse).into();
        assert!(matches!(err, RegistryError::Serialization(_)));
    }
}
