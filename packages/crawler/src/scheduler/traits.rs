//! Scheduler trait definitions

use chrono::{DateTime, Datelike, Duration, DurationRound, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Error type for scheduler operations
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Trigger not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid schedule expression: {0}")]
    InvalidSchedule(String),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl SchedulerError {
    /// The thing being removed was already gone
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// A single UTC minute at which a trigger fires.
///
/// The expression pins minute, hour, day, month and year, so it matches
/// exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FireOnce {
    at: DateTime<Utc>,
}

impl FireOnce {
    pub fn at(at: DateTime<Utc>) -> Self {
        let at = at.duration_trunc(Duration::minutes(1)).unwrap_or(at);
        Self { at }
    }

    /// Fire `minutes` after `now`
    pub fn after_minutes(minutes: u32, now: DateTime<Utc>) -> Self {
        Self::at(now + Duration::minutes(i64::from(minutes)))
    }

    pub fn fire_at(&self) -> DateTime<Utc> {
        self.at
    }

    /// AWS schedule expression, `cron(M H D Mo ? Y)`
    pub fn aws_expression(&self) -> String {
        format!(
            "cron({} {} {} {} ? {})",
            self.at.minute(),
            self.at.hour(),
            self.at.day(),
            self.at.month(),
            self.at.year()
        )
    }

    /// Seven-field expression with seconds, as understood by the `cron` crate
    pub fn cron_expression(&self) -> String {
        format!(
            "0 {} {} {} {} * {}",
            self.at.minute(),
            self.at.hour(),
            self.at.day(),
            self.at.month(),
            self.at.year()
        )
    }
}

/// What a trigger invokes when it fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerTarget {
    /// Target id, unique per trigger
    pub id: String,

    /// Entrypoint invoked (the crawl function ARN on AWS)
    pub entrypoint: String,

    /// Serialized continuation state handed to the entrypoint
    pub input: String,
}

/// Backend for one-shot triggers
///
/// Triggers are keyed by name. Every operation is an upsert or a removal so
/// repeated calls leave the backend in the same state.
#[async_trait::async_trait]
pub trait SchedulerClient: Send + Sync {
    /// Create or replace a trigger's schedule and enabled state.
    ///
    /// Returns the trigger's provider identifier.
    async fn upsert_trigger(
        &self,
        name: &str,
        schedule: &FireOnce,
        enabled: bool,
    ) -> SchedulerResult<String>;

    /// Whether the trigger is still registered
    async fn trigger_exists(&self, name: &str) -> SchedulerResult<bool>;

    /// Create or replace one target of a trigger
    async fn attach_target(&self, name: &str, target: &TriggerTarget) -> SchedulerResult<()>;

    /// Detach targets by id
    async fn remove_targets(&self, name: &str, target_ids: &[String]) -> SchedulerResult<()>;

    /// Delete a trigger. Fails with `NotFound` if it does not exist.
    async fn remove_trigger(&self, name: &str) -> SchedulerResult<()>;

    /// Allow the trigger to invoke the entrypoint.
    ///
    /// Fails with `AlreadyExists` if the grant is already present.
    async fn grant_invoke(
        &self,
        name: &str,
        trigger_id: &str,
        entrypoint: &str,
    ) -> SchedulerResult<()>;

    /// Remove the trigger's invoke grant
    async fn revoke_invoke(&self, name: &str, entrypoint: &str) -> SchedulerResult<()>;
}
