//! Integration registry - durable records of subscriptions and users
//!
//! The registry is only touched by subscribe and unsubscribe. A running
//! crawl never reads it; everything it needs travels in the trigger payload.

#[cfg(feature = "aws")]
pub mod dynamodb;
pub mod memory;

#[cfg(feature = "aws")]
pub use dynamodb::DynamoDbRegistry;
pub use memory::MemoryRegistry;

use crate::types::{Client, Integration};

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Error type for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Storage for integrations (keyed by destination URL) and clients (keyed
/// by user id)
#[async_trait::async_trait]
pub trait Registry: Send + Sync {
    /// Create or replace an integration
    async fn put_integration(&self, integration: &Integration) -> RegistryResult<()>;

    async fn get_integration(&self, destination_url: &str) -> RegistryResult<Option<Integration>>;

    /// Delete an integration. Deleting a missing record is not an error.
    async fn delete_integration(&self, destination_url: &str) -> RegistryResult<()>;

    /// Create or replace a client
    async fn put_client(&self, client: &Client) -> RegistryResult<()>;

    async fn get_client(&self, user_id: &str) -> RegistryResult<Option<Client>>;
}
