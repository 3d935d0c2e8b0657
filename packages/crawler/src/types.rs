//! Integration records and the transient items flowing through a scan

use crate::state::SourceCredentials;
use serde::{Deserialize, Serialize};

/// One configured crawl + delivery subscription, as stored in the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Integration {
    /// Owning user
    pub user_id: String,

    /// Saved search filter, without the source-side suffix
    pub query: String,

    /// Where delivered items are POSTed; also the registry key
    #[serde(rename = "url")]
    pub destination_url: String,
}

/// A user of the platform together with the source credentials they granted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub user_id: String,

    #[serde(default)]
    pub account_id: Option<String>,

    /// Absent until the source authorization flow has completed
    #[serde(flatten)]
    pub credentials: Option<SourceCredentials>,
}

/// A raw search result as returned by the source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceItem {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub author_id: Option<String>,
}

/// Denormalized author data the source returns alongside a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    #[serde(default)]
    pub username: String,
}

/// An item ready for delivery: the source item joined with its author.
///
/// Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryItem {
    pub id: String,
    pub text: String,
    pub created_at: String,
    pub author_id: Option<String>,
    pub author_name: Option<String>,
}

impl DeliveryItem {
    /// Join a source item with the page's author expansion
    pub fn join(item: SourceItem, authors: &[Author]) -> Self {
        let author_name = item.author_id.as_deref().and_then(|author_id| {
            authors
                .iter()
                .find(|author| author.id == author_id)
                .map(|author| author.username.clone())
        });

        Self {
            id: item.id,
            text: item.text,
            created_at: item.created_at.unwrap_or_default(),
            author_id: item.author_id,
            author_name,
        }
    }

    /// Calendar date of creation (`YYYY-MM-DD`), empty when unknown
    pub fn creation_date(&self) -> &str {
        self.created_at.get(..10).unwrap_or(&self.created_at)
    }
}
