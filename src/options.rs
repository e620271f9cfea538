//! Normalized subscription requests

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{
    EntityFilter, KeyFilter, PageLink, SubscriptionDataKey, SubscriptionMode,
    SubscriptionTimewindow,
};
use crate::utils::object_hash_code;

/// Server-side selection carried by a request. Only entity-filter sources
/// have one; static sources cannot carry a filter at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "datasourceType")]
pub enum SourceOptions {
    #[serde(rename = "entity", rename_all = "camelCase")]
    EntityFilter {
        entity_filter: EntityFilter,
        page_link: PageLink,
        #[serde(default)]
        key_filters: Vec<KeyFilter>,
    },
    #[serde(rename = "function")]
    Static,
}

/// Fully resolved request handed to the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionOptions {
    #[serde(flatten)]
    pub source: SourceOptions,
    pub data_keys: Vec<SubscriptionDataKey>,
    #[serde(rename = "type")]
    pub mode: SubscriptionMode,
    /// One-shot refresh of current values rather than a continuous feed
    pub is_latest: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timewindow: Option<SubscriptionTimewindow>,
}

impl SubscriptionOptions {
    pub fn entity_filter(&self) -> Option<&EntityFilter> {
        match &self.source {
            SourceOptions::EntityFilter { entity_filter, .. } => Some(entity_filter),
            SourceOptions::Static => None,
        }
    }

    pub fn page_link(&self) -> Option<&PageLink> {
        match &self.source {
            SourceOptions::EntityFilter { page_link, .. } => Some(page_link),
            SourceOptions::Static => None,
        }
    }

    pub fn key_filters(&self) -> &[KeyFilter] {
        match &self.source {
            SourceOptions::EntityFilter { key_filters, .. } => key_filters,
            SourceOptions::Static => &[],
        }
    }

    /// Index of a requested key by name
    pub fn key_index(&self, name: &str) -> Option<usize> {
        self.data_keys.iter().position(|k| k.name == name)
    }

    /// Stable hash of the request, used as a dedup key in logs and by callers
    pub fn hash_code(&self) -> Result<i64> {
        object_hash_code(self)
    }
}
