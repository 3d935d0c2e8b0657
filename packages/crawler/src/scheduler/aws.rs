//! AWS EventBridge implementation
//!
//! Each trigger is an EventBridge rule with a one-shot cron expression and a
//! single Lambda target whose constant input is the continuation state. The
//! invoke grant is a statement on the crawl function's resource policy,
//! named after the rule.

use super::{FireOnce, SchedulerClient, SchedulerError, SchedulerResult, TriggerTarget};
use aws_sdk_eventbridge::types::{RuleState, Target};

const EVENTS_PRINCIPAL: &str = "events.amazonaws.com";

/// AWS EventBridge configuration
#[derive(Debug, Clone, Default)]
pub struct AwsEventBridgeConfig {
    /// Event bus the rules live on (the default bus if unset)
    pub event_bus_name: Option<String>,
}

impl AwsEventBridgeConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            event_bus_name: std::env::var("EVENTBRIDGE_BUS_NAME").ok(),
        }
    }
}

/// EventBridge rules + Lambda permissions
pub struct AwsEventBridgeScheduler {
    config: AwsEventBridgeConfig,
    events: aws_sdk_eventbridge::Client,
    lambda: aws_sdk_lambda::Client,
}

impl AwsEventBridgeScheduler {
    /// Create a new scheduler from environment variables
    pub async fn from_env() -> Self {
        Self::new(AwsEventBridgeConfig::from_env()).await
    }

    /// Create a new scheduler with explicit configuration
    pub async fn new(config: AwsEventBridgeConfig) -> Self {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::from_clients(
            config,
            aws_sdk_eventbridge::Client::new(&aws_config),
            aws_sdk_lambda::Client::new(&aws_config),
        )
    }

    pub fn from_clients(
        config: AwsEventBridgeConfig,
        events: aws_sdk_eventbridge::Client,
        lambda: aws_sdk_lambda::Client,
    ) -> Self {
        Self {
            config,
            events,
            lambda,
        }
    }
}

fn provider_error(e: impl std::fmt::Display) -> SchedulerError {
    SchedulerError::ProviderError(format!("AWS SDK error: {}", e))
}

#[async_trait::async_trait]
impl SchedulerClient for AwsEventBridgeScheduler {
    async fn upsert_trigger(
        &self,
        name: &str,
        schedule: &FireOnce,
        enabled: bool,
    ) -> SchedulerResult<String> {
        let expression = schedule.aws_expression();
        let state = if enabled {
            RuleState::Enabled
        } else {
            RuleState::Disabled
        };

        let output = self
            .events
            .put_rule()
            .name(name)
            .set_event_bus_name(self.config.event_bus_name.clone())
            .schedule_expression(&expression)
            .state(state)
            .send()
            .await
            .map_err(provider_error)?;

        tracing::info!(
            rule = %name,
            cron = %expression,
            enabled,
            "Put EventBridge rule"
        );

        Ok(output.rule_arn().unwrap_or_default().to_string())
    }

    async fn trigger_exists(&self, name: &str) -> SchedulerResult<bool> {
        match self
            .events
            .describe_rule()
            .name(name)
            .set_event_bus_name(self.config.event_bus_name.clone())
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e)
                if e.as_service_error()
                    .map(|se| se.is_resource_not_found_exception())
                    .unwrap_or(false) =>
            {
                Ok(false)
            }
            Err(e) => Err(provider_error(e)),
        }
    }

    async fn attach_target(&self, name: &str, target: &TriggerTarget) -> SchedulerResult<()> {
        let aws_target = Target::builder()
            .id(&target.id)
            .arn(&target.entrypoint)
            .input(&target.input)
            .build()
            .map_err(|e| SchedulerError::ProviderError(format!("Failed to build target: {}", e)))?;

        let output = self
            .events
            .put_targets()
            .rule(name)
            .set_event_bus_name(self.config.event_bus_name.clone())
            .targets(aws_target)
            .send()
            .await
            .map_err(|e| {
                let is_missing = e
                    .as_service_error()
                    .map(|se| se.is_resource_not_found_exception())
                    .unwrap_or(false);
                if is_missing {
                    SchedulerError::NotFound(name.to_string())
                } else {
                    provider_error(e)
                }
            })?;

        if output.failed_entry_count() > 0 {
            let reasons: Vec<_> = output
                .failed_entries()
                .iter()
                .filter_map(|entry| entry.error_message())
                .collect();
            return Err(SchedulerError::ProviderError(format!(
                "Failed to put target on {}: {}",
                name,
                reasons.join("; ")
            )));
        }

        tracing::debug!(rule = %name, target_id = %target.id, "Put EventBridge target");
        Ok(())
    }

    async fn remove_targets(&self, name: &str, target_ids: &[String]) -> SchedulerResult<()> {
        self.events
            .remove_targets()
            .rule(name)
            .set_event_bus_name(self.config.event_bus_name.clone())
            .set_ids(Some(target_ids.to_vec()))
            .force(true)
            .send()
            .await
            .map_err(|e| {
                let is_missing = e
                    .as_service_error()
                    .map(|se| se.is_resource_not_found_exception())
                    .unwrap_or(false);
                if is_missing {
                    SchedulerError::NotFound(name.to_string())
                } else {
                    provider_error(e)
                }
            })?;
        Ok(())
    }

    async fn remove_trigger(&self, name: &str) -> SchedulerResult<()> {
        self.events
            .delete_rule()
            .name(name)
            .set_event_bus_name(self.config.event_bus_name.clone())
            .force(true)
            .send()
            .await
            .map_err(|e| {
                let is_missing = e
                    .as_service_error()
                    .map(|se| se.is_resource_not_found_exception())
                    .unwrap_or(false);
                if is_missing {
                    SchedulerError::NotFound(name.to_string())
                } else {
                    provider_error(e)
                }
            })?;

        tracing::info!(rule = %name, "Deleted EventBridge rule");
        Ok(())
    }

    async fn grant_invoke(
        &self,
        name: &str,
        trigger_id: &str,
        entrypoint: &str,
    ) -> SchedulerResult<()> {
        self.lambda
            .add_permission()
            .function_name(entrypoint)
            .statement_id(name)
            .action("lambda:InvokeFunction")
            .principal(EVENTS_PRINCIPAL)
            .source_arn(trigger_id)
            .send()
            .await
            .map_err(|e| {
                let is_conflict = e
                    .as_service_error()
                    .map(|se| se.is_resource_conflict_exception())
                    .unwrap_or(false);
                if is_conflict {
                    SchedulerError::AlreadyExists(name.to_string())
                } else {
                    provider_error(e)
                }
            })?;

        tracing::debug!(statement_id = %name, "Added Lambda invoke permission");
        Ok(())
    }

    async fn revoke_invoke(&self, name: &str, entrypoint: &str) -> SchedulerResult<()> {
        self.lambda
            .remove_permission()
            .function_name(entrypoint)
            .statement_id(name)
            .send()
            .await
            .map_err(|e| {
                let is_missing = e
                    .as_service_error()
                    .map(|se| se.is_resource_not_found_exception())
                    .unwrap_or(false);
                if is_missing {
                    SchedulerError::NotFound(name.to_string())
                } else {
                    provider_error(e)
                }
            })?;
        Ok(())
    }
}
