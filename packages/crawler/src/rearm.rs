//! Trigger rearmer
//!
//! Commits a continuation state by scheduling the integration's one-shot
//! trigger again and replacing its target payload. The trigger name is the
//! integration id, so rearming never creates a second trigger.

use crate::scheduler::{FireOnce, SchedulerClient, SchedulerError, SchedulerResult, TriggerTarget};
use crate::state::{ContinuationState, IntegrationId};
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Clone)]
pub struct Rearmer {
    scheduler: Arc<dyn SchedulerClient>,
    delay_minutes: u32,
}

impl Rearmer {
    pub fn new(scheduler: Arc<dyn SchedulerClient>, delay_minutes: u32) -> Self {
        Self {
            scheduler,
            delay_minutes,
        }
    }

    /// The target a trigger fires, carrying `payload`
    pub fn target(id: &IntegrationId, entrypoint: &str, payload: String) -> TriggerTarget {
        TriggerTarget {
            id: id.target_id(),
            entrypoint: entrypoint.to_string(),
            input: payload,
        }
    }

    /// Schedule the next fire and attach `state` as its payload.
    ///
    /// A trigger removed while the invocation ran belongs to an unsubscribed
    /// integration; it is not recreated.
    #[tracing::instrument(name = "rearm", skip(self, state), fields(integration_id = %id))]
    pub async fn rearm(
        &self,
        id: &IntegrationId,
        entrypoint: &str,
        state: &ContinuationState,
    ) -> SchedulerResult<RearmOutcome> {
        let schedule = FireOnce::after_minutes(self.delay_minutes, Utc::now());
        let payload = state.to_payload().map_err(|e| {
            SchedulerError::ProviderError(format!("Failed to encode continuation state: {}", e))
        })?;

        if !self.scheduler.trigger_exists(id.as_str()).await? {
            tracing::info!("Trigger is gone, integration deprovisioned; not rearming");
            return Ok(RearmOutcome::Deprovisioned);
        }

        self.scheduler
            .upsert_trigger(id.as_str(), &schedule, true)
            .await?;
        self.scheduler
            .attach_target(id.as_str(), &Self::target(id, entrypoint, payload))
            .await?;

        tracing::info!(
            fire_at = %schedule.fire_at(),
            last_id = ?state.last_id,
            next_token = ?state.next_token,
            "Rearmed trigger"
        );
        Ok(RearmOutcome::Armed(schedule))
    }
}

/// What a rearm did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RearmOutcome {
    Armed(FireOnce),
    /// The trigger no longer exists
    Deprovisioned,
}

impl RearmOutcome {
    pub fn fire_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Armed(schedule) => Some(schedule.fire_at()),
            Self::Deprovisioned => None,
        }
    }
}
