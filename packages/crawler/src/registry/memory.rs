//! In-memory registry for local runs and tests

use super::{Registry, RegistryResult};
use crate::types::{Client, Integration};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct MemoryRegistry {
    integrations: Arc<RwLock<HashMap<String, Integration>>>,
    clients: Arc<RwLock<HashMap<String, Client>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn integrations(&self) -> Vec<Integration> {
        self.integrations.read().values().cloned().collect()
    }
}

#[async_trait::async_trait]
impl Registry for MemoryRegistry {
    async fn put_integration(&self, integration: &Integration) -> RegistryResult<()> {
        self.integrations
            .write()
            .insert(integration.destination_url.clone(), integration.clone());
        Ok(())
    }

    async fn get_integration(&self, destination_url: &str) -> RegistryResult<Option<Integration>> {
        Ok(self.integrations.read().get(destination_url).cloned())
    }

    async fn delete_integration(&self, destination_url: &str) -> RegistryResult<()> {
        self.integrations.write().remove(destination_url);
        Ok(())
    }

    async fn put_client(&self, client: &Client) -> RegistryResult<()> {
        self.clients
            .write()
            .insert(client.user_id.clone(), client.clone());
        Ok(())
    }

    async fn get_client(&self, user_id: &str) -> RegistryResult<Option<Client>> {
        Ok(self.clients.read().get(user_id).cloned())
    }
}
