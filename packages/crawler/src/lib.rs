//! Populate Crawler - self-rescheduling incremental crawl engine
//!
//! Each invocation of the crawl entrypoint scans one subscription: it pages
//! through the search source starting at the cursor carried in its payload,
//! forwards every item to the subscription's destination, and finally
//! rearms the one-shot trigger that will invoke it again, writing the
//! advanced cursor into that trigger's payload. The trigger payload is the
//! only place scan progress lives.
//!
//! ## Components
//!
//! | Component | Module | Description |
//! |-----------|--------|-------------|
//! | Continuation state | [`state`] | Cursor + pagination token, the trigger payload |
//! | Page fetcher | [`search`] | One page of results from the search source |
//! | Delivery sink | [`delivery`] | Per-item forwarding to the destination |
//! | Backoff | [`backoff`] | Transient retry vs. abort-and-reschedule |
//! | Scan loop | [`scan`] | Page budget, cursor advancement |
//! | Rearmer | [`rearm`] | One-shot schedule + payload upsert |
//! | Lifecycle | [`lifecycle`] | Subscribe / unsubscribe provisioning |

mod config;
mod crawl;
mod types;

pub mod backoff;
pub mod delivery;
pub mod lifecycle;
pub mod rearm;
pub mod registry;
pub mod scan;
pub mod scheduler;
pub mod search;
pub mod state;

pub use config::{ConfigError, CrawlConfig, LifecycleConfig, RetryCeiling};
pub use crawl::{CrawlEngine, CrawlError, InvocationReport};
pub use delivery::{DeliveryError, DeliveryReport, DeliverySink};
pub use lifecycle::{
    IntegrationManager, IntegrationPhase, LifecycleError, StepOutcome, SubscribeReport,
    UnsubscribeReport,
};
pub use rearm::{RearmOutcome, Rearmer};
pub use registry::{MemoryRegistry, Registry, RegistryError, RegistryResult};
pub use scan::{ScanReport, Termination};
pub use scheduler::{
    FireOnce, InMemoryScheduler, SchedulerClient, SchedulerError, SchedulerResult, TriggerTarget,
};
pub use search::{FetchError, SearchClient, SearchConnector, SearchPage, SearchRequest};
pub use state::{ContinuationState, IntegrationId, SourceCredentials, StateError};
pub use types::{Author, Client, DeliveryItem, Integration, SourceItem};
