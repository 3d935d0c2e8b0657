//! In-memory scheduler
//!
//! This is used for Docker Compose and local development where we don't have
//! access to EventBridge. The actual firing is handled by a separate tick
//! loop that calls `take_due()` and invokes each target.

use super::{FireOnce, SchedulerClient, SchedulerError, SchedulerResult, TriggerTarget};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-memory state for a single trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRecord {
    pub name: String,
    pub cron_expression: String,
    pub fire_at: DateTime<Utc>,
    pub enabled: bool,
    /// Set once the trigger has fired; cleared by the next upsert
    pub fired: bool,
    pub targets: Vec<TriggerTarget>,
}

/// Grant allowing a trigger to invoke an entrypoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeGrant {
    pub name: String,
    pub trigger_id: String,
    pub entrypoint: String,
}

/// Everything the scheduler holds, for persistence across restarts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    pub triggers: Vec<TriggerRecord>,
    pub grants: Vec<InvokeGrant>,
}

/// A trigger that fired, with the targets to invoke
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueTrigger {
    pub name: String,
    pub targets: Vec<TriggerTarget>,
}

#[derive(Default)]
struct State {
    triggers: HashMap<String, TriggerRecord>,
    grants: HashMap<String, InvokeGrant>,
}

/// In-memory scheduler implementation
#[derive(Clone, Default)]
pub struct InMemoryScheduler {
    state: Arc<RwLock<State>>,
    revision: Arc<AtomicU64>,
}

impl InMemoryScheduler {
    /// Create a new in-memory scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Incremented on every change, lets callers skip persisting unchanged state
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.revision.fetch_add(1, Ordering::SeqCst);
    }

    /// Consume every enabled trigger whose fire time has passed.
    ///
    /// A trigger fires once; it stays registered until removed or upserted
    /// with a new schedule. Triggers without an invoke grant cannot reach
    /// their entrypoint and are left alone.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<DueTrigger> {
        let mut state = self.state.write();
        let State { triggers, grants } = &mut *state;
        let mut due: Vec<DueTrigger> = triggers
            .values_mut()
            .filter(|t| t.enabled && !t.fired && t.fire_at <= now)
            .filter(|t| grants.contains_key(&t.name))
            .map(|t| {
                t.fired = true;
                DueTrigger {
                    name: t.name.clone(),
                    targets: t.targets.clone(),
                }
            })
            .collect();
        drop(state);

        if !due.is_empty() {
            self.bump();
        }
        due.sort_by(|a, b| a.name.cmp(&b.name));
        due
    }

    pub fn get_trigger(&self, name: &str) -> Option<TriggerRecord> {
        self.state.read().triggers.get(name).cloned()
    }

    pub fn has_grant(&self, name: &str) -> bool {
        self.state.read().grants.contains_key(name)
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        let state = self.state.read();
        let mut triggers: Vec<_> = state.triggers.values().cloned().collect();
        triggers.sort_by(|a, b| a.name.cmp(&b.name));
        let mut grants: Vec<_> = state.grants.values().cloned().collect();
        grants.sort_by(|a, b| a.name.cmp(&b.name));
        SchedulerSnapshot { triggers, grants }
    }

    /// Replace all state with a previously taken snapshot
    pub fn restore(&self, snapshot: SchedulerSnapshot) {
        let mut state = self.state.write();
        state.triggers = snapshot
            .triggers
            .into_iter()
            .map(|t| (t.name.clone(), t))
            .collect();
        state.grants = snapshot
            .grants
            .into_iter()
            .map(|g| (g.name.clone(), g))
            .collect();
        drop(state);
        self.bump();
    }
}

#[async_trait::async_trait]
impl SchedulerClient for InMemoryScheduler {
    async fn upsert_trigger(
        &self,
        name: &str,
        schedule: &FireOnce,
        enabled: bool,
    ) -> SchedulerResult<String> {
        let cron_expression = schedule.cron_expression();
        cron::Schedule::from_str(&cron_expression)
            .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;

        let mut state = self.state.write();
        state
            .triggers
            .entry(name.to_string())
            .and_modify(|t| {
                t.cron_expression = cron_expression.clone();
                t.fire_at = schedule.fire_at();
                t.enabled = enabled;
                t.fired = false;
            })
            .or_insert_with(|| TriggerRecord {
                name: name.to_string(),
                cron_expression: cron_expression.clone(),
                fire_at: schedule.fire_at(),
                enabled,
                fired: false,
                targets: Vec::new(),
            });
        drop(state);
        self.bump();

        tracing::debug!(name = %name, cron = %cron_expression, enabled, "Upserted trigger");
        Ok(format!("memory:trigger/{}", name))
    }

    async fn trigger_exists(&self, name: &str) -> SchedulerResult<bool> {
        Ok(self.state.read().triggers.contains_key(name))
    }

    async fn attach_target(&self, name: &str, target: &TriggerTarget) -> SchedulerResult<()> {
        let mut state = self.state.write();
        let trigger = state
            .triggers
            .get_mut(name)
            .ok_or_else(|| SchedulerError::NotFound(name.to_string()))?;

        match trigger.targets.iter_mut().find(|t| t.id == target.id) {
            Some(existing) => *existing = target.clone(),
            None => trigger.targets.push(target.clone()),
        }
        drop(state);
        self.bump();
        Ok(())
    }

    async fn remove_targets(&self, name: &str, target_ids: &[String]) -> SchedulerResult<()> {
        let mut state = self.state.write();
        let trigger = state
            .triggers
            .get_mut(name)
            .ok_or_else(|| SchedulerError::NotFound(name.to_string()))?;
        trigger.targets.retain(|t| !target_ids.contains(&t.id));
        drop(state);
        self.bump();
        Ok(())
    }

    async fn remove_trigger(&self, name: &str) -> SchedulerResult<()> {
        let mut state = self.state.write();
        let trigger = state
            .triggers
            .get(name)
            .ok_or_else(|| SchedulerError::NotFound(name.to_string()))?;
        if !trigger.targets.is_empty() {
            return Err(SchedulerError::ProviderError(format!(
                "Trigger {} still has targets",
                name
            )));
        }
        state.triggers.remove(name);
        drop(state);
        self.bump();
        Ok(())
    }

    async fn grant_invoke(
        &self,
        name: &str,
        trigger_id: &str,
        entrypoint: &str,
    ) -> SchedulerResult<()> {
        let mut state = self.state.write();
        if state.grants.contains_key(name) {
            return Err(SchedulerError::AlreadyExists(name.to_string()));
        }
        state.grants.insert(
            name.to_string(),
            InvokeGrant {
                name: name.to_string(),
                trigger_id: trigger_id.to_string(),
                entrypoint: entrypoint.to_string(),
            },
        );
        drop(state);
        self.bump();
        Ok(())
    }

    async fn revoke_invoke(&self, name: &str, _entrypoint: &str) -> SchedulerResult<()> {
        self.state
            .write()
            .grants
            .remove(name)
            .ok_or_else(|| SchedulerError::NotFound(name.to_string()))?;
        self.bump();
        Ok(())
    }
}
