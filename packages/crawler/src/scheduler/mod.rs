//! Scheduler backends for one-shot crawl triggers
//!
//! - AWS EventBridge rules with Lambda targets (feature `aws`)
//! - In-memory scheduler (for Docker Compose / local development and tests)

mod traits;

#[cfg(feature = "aws")]
pub mod aws;
pub mod memory;

#[cfg(feature = "aws")]
pub use aws::{AwsEventBridgeConfig, AwsEventBridgeScheduler};
pub use memory::{DueTrigger, InMemoryScheduler, InvokeGrant, SchedulerSnapshot, TriggerRecord};
pub use traits::{FireOnce, SchedulerClient, SchedulerError, SchedulerResult, TriggerTarget};
