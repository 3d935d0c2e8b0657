//! Integration lifecycle
//!
//! Provisions and tears down the elements backing one integration: the
//! registry record, the one-shot trigger, the trigger's permission to invoke
//! the crawl entrypoint, and the payload attached as the trigger's target.

use crate::config::LifecycleConfig;
use crate::rearm::Rearmer;
use crate::registry::{Registry, RegistryError};
use crate::scheduler::{FireOnce, SchedulerClient, SchedulerError};
use crate::state::{ContinuationState, IntegrationId, StateError};
use crate::types::Integration;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

/// Error type for lifecycle operations
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("No source credentials stored for user {0}")]
    MissingCredentials(String),

    #[error("Invalid phase transition {from} -> {to}")]
    InvalidTransition {
        from: IntegrationPhase,
        to: IntegrationPhase,
    },
}

/// Where an integration is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntegrationPhase {
    Provisioning,
    /// A trigger is scheduled with a payload attached
    Armed,
    /// The trigger fired and a crawl invocation is running
    Scanning,
    /// The last scan aborted; the trigger is rearmed with the old cursor
    Backoff,
    Deprovisioned,
}

impl IntegrationPhase {
    pub fn can_transition_to(self, next: IntegrationPhase) -> bool {
        use IntegrationPhase::*;
        matches!(
            (self, next),
            (Provisioning, Armed)
                | (Armed, Scanning)
                | (Scanning, Armed)
                | (Scanning, Backoff)
                | (Backoff, Armed)
                | (_, Deprovisioned)
        )
    }

    pub fn transition(self, next: IntegrationPhase) -> Result<IntegrationPhase, LifecycleError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(LifecycleError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for IntegrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Provisioning => "provisioning",
            Self::Armed => "armed",
            Self::Scanning => "scanning",
            Self::Backoff => "backoff",
            Self::Deprovisioned => "deprovisioned",
        };
        f.write_str(name)
    }
}

/// Result of a successful subscribe
#[derive(Debug, Clone)]
pub struct SubscribeReport {
    pub integration_id: IntegrationId,
    /// Provider identifier of the trigger (the rule ARN on AWS)
    pub trigger_id: String,
    pub first_fire_at: DateTime<Utc>,
    pub phase: IntegrationPhase,
}

/// Outcome of one teardown step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    AlreadyAbsent,
    Failed(String),
}

impl StepOutcome {
    fn from_scheduler(result: Result<(), SchedulerError>) -> Self {
        match result {
            Ok(()) => Self::Done,
            Err(e) if e.is_absent() => Self::AlreadyAbsent,
            Err(e) => Self::Failed(e.to_string()),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Per-step outcome of an unsubscribe
#[derive(Debug, Clone)]
pub struct UnsubscribeReport {
    pub integration_id: IntegrationId,
    pub targets: StepOutcome,
    pub trigger: StepOutcome,
    pub permission: StepOutcome,
    pub record: StepOutcome,
}

impl UnsubscribeReport {
    pub fn is_clean(&self) -> bool {
        ![&self.targets, &self.trigger, &self.permission, &self.record]
            .iter()
            .any(|step| step.is_failed())
    }
}

/// Subscribes and unsubscribes integrations
#[derive(Clone)]
pub struct IntegrationManager {
    registry: Arc<dyn Registry>,
    scheduler: Arc<dyn SchedulerClient>,
    config: LifecycleConfig,
}

impl IntegrationManager {
    pub fn new(
        registry: Arc<dyn Registry>,
        scheduler: Arc<dyn SchedulerClient>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            registry,
            scheduler,
            config,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Provision an integration.
    ///
    /// Safe to repeat for the same destination: every step is an upsert,
    /// and an existing invoke grant is accepted.
    #[tracing::instrument(name = "subscribe", skip(self, query), fields(integration_id))]
    pub async fn subscribe(
        &self,
        user_id: &str,
        query: &str,
        destination_url: &str,
    ) -> Result<SubscribeReport, LifecycleError> {
        let mut phase = IntegrationPhase::Provisioning;

        self.registry
            .put_integration(&Integration {
                user_id: user_id.to_string(),
                query: query.to_string(),
                destination_url: destination_url.to_string(),
            })
            .await?;

        let id = IntegrationId::from_destination_url(destination_url)?;
        tracing::Span::current().record("integration_id", id.as_str());

        // Created disabled so it cannot fire before its payload is attached
        let schedule = FireOnce::after_minutes(self.config.initial_delay_minutes, Utc::now());
        let trigger_id = self
            .scheduler
            .upsert_trigger(id.as_str(), &schedule, false)
            .await?;

        match self
            .scheduler
            .grant_invoke(id.as_str(), &trigger_id, &self.config.crawl_entrypoint)
            .await
        {
            Ok(()) => {}
            Err(SchedulerError::AlreadyExists(_)) => {
                tracing::info!("Invoke permission already granted");
            }
            Err(e) => return Err(e.into()),
        }

        let credentials = self
            .registry
            .get_client(user_id)
            .await?
            .and_then(|client| client.credentials)
            .ok_or_else(|| LifecycleError::MissingCredentials(user_id.to_string()))?;

        let state = ContinuationState::new(query, destination_url, credentials);
        let target = Rearmer::target(&id, &self.config.crawl_entrypoint, state.to_payload()?);
        self.scheduler.attach_target(id.as_str(), &target).await?;

        self.scheduler
            .upsert_trigger(id.as_str(), &schedule, true)
            .await?;
        phase = phase.transition(IntegrationPhase::Armed)?;

        tracing::info!(fire_at = %schedule.fire_at(), "Integration subscribed");

        Ok(SubscribeReport {
            integration_id: id,
            trigger_id,
            first_fire_at: schedule.fire_at(),
            phase,
        })
    }

    /// Tear an integration down.
    ///
    /// Targets go before the trigger so a rule is never left firing at
    /// nothing. Every step runs even if an earlier one failed; elements that
    /// are already gone count as done.
    #[tracing::instrument(name = "unsubscribe", skip(self), fields(integration_id))]
    pub async fn unsubscribe(
        &self,
        destination_url: &str,
    ) -> Result<UnsubscribeReport, LifecycleError> {
        let id = IntegrationId::from_destination_url(destination_url)?;
        tracing::Span::current().record("integration_id", id.as_str());

        let targets = StepOutcome::from_scheduler(
            self.scheduler
                .remove_targets(id.as_str(), &[id.target_id()])
                .await,
        );
        log_step("remove targets", &targets);

        let trigger = StepOutcome::from_scheduler(self.scheduler.remove_trigger(id.as_str()).await);
        log_step("remove trigger", &trigger);

        let permission = StepOutcome::from_scheduler(
            self.scheduler
                .revoke_invoke(id.as_str(), &self.config.crawl_entrypoint)
                .await,
        );
        log_step("revoke permission", &permission);

        let record = match self.registry.delete_integration(destination_url).await {
            Ok(()) => StepOutcome::Done,
            Err(e) => StepOutcome::Failed(e.to_string()),
        };
        log_step("delete record", &record);

        Ok(UnsubscribeReport {
            integration_id: id,
            targets,
            trigger,
            permission,
            record,
        })
    }
}

fn log_step(step: &str, outcome: &StepOutcome) {
    match outcome {
        StepOutcome::Done => tracing::info!(step, "Done"),
        StepOutcome::AlreadyAbsent => tracing::info!(step, "Already absent"),
        StepOutcome::Failed(error) => tracing::error!(step, error = %error, "Step failed"),
    }
}
