//! Delivery sink - forwards fetched items to a subscription's destination
//!
//! Delivery is at-least-once and per item: a failed item is logged and
//! dropped, it never holds back its siblings or the scan cursor.

pub mod webhook;

pub use webhook::{WebhookConfig, WebhookSink};

use crate::types::DeliveryItem;
use futures::future::join_all;

/// Error type for item delivery
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Delivery request failed: {0}")]
    Request(String),

    #[error("Failed to encode item: {0}")]
    Encode(String),
}

/// Outcome of one delivery that reached the destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// HTTP status the destination answered with
    pub status: u16,
}

/// A destination for delivered items
#[async_trait::async_trait]
pub trait DeliverySink: Send + Sync {
    /// Send one item.
    ///
    /// Any completed response is a receipt, whatever its status; only
    /// failing to get a response at all is an error.
    async fn deliver(
        &self,
        destination_url: &str,
        item: &DeliveryItem,
    ) -> Result<DeliveryReceipt, DeliveryError>;
}

/// Per-page delivery summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Items the destination answered with a success status
    pub accepted: usize,
    /// Items the destination answered with an error status
    pub rejected: usize,
    /// Items that never got a response
    pub failed: usize,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.accepted + self.rejected + self.failed
    }

    pub fn merge(&mut self, other: &DeliveryReport) {
        self.accepted += other.accepted;
        self.rejected += other.rejected;
        self.failed += other.failed;
    }
}

/// Deliver a page of items concurrently.
///
/// Requests are issued in source order; each outcome is logged on its own.
pub async fn deliver_page(
    sink: &dyn DeliverySink,
    destination_url: &str,
    items: &[DeliveryItem],
) -> DeliveryReport {
    let outcomes = join_all(
        items
            .iter()
            .map(|item| async move { (item, sink.deliver(destination_url, item).await) }),
    )
    .await;

    let mut report = DeliveryReport::default();
    for (item, outcome) in outcomes {
        match outcome {
            Ok(receipt) if (200..300).contains(&receipt.status) => {
                report.accepted += 1;
            }
            Ok(receipt) => {
                tracing::warn!(
                    item_id = %item.id,
                    status = receipt.status,
                    "Destination rejected item"
                );
                report.rejected += 1;
            }
            Err(e) => {
                tracing::error!(item_id = %item.id, error = %e, "Failed to deliver item");
                report.failed += 1;
            }
        }
    }

    report
}
