use populate_crawler::{ConfigError, IntegrationManager};
use std::sync::Arc;

pub type AppState = Arc<State>;

pub struct State {
    pub manager: IntegrationManager,

    /// Shared secret the platform signs request tokens with
    pub endpoint_secret: String,
}

impl State {
    pub fn new(manager: IntegrationManager, endpoint_secret: impl Into<String>) -> Self {
        Self {
            manager,
            endpoint_secret: endpoint_secret.into(),
        }
    }

    /// Create from environment variables, reading `MONDAY_ENDPOINT_SECRET`
    pub fn from_env(manager: IntegrationManager) -> Result<Self, ConfigError> {
        let endpoint_secret = std::env::var("MONDAY_ENDPOINT_SECRET")
            .map_err(|_| ConfigError::Missing("MONDAY_ENDPOINT_SECRET"))?;
        Ok(Self::new(manager, endpoint_secret))
    }
}
