//! Events pushed by the transport

use serde::{Deserialize, Serialize};

use super::SubscriptionId;
use crate::types::{EntityData, PageData};

/// Failure reported by the transport for one registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportErrorInfo {
    pub code: i32,
    pub message: String,
}

/// A push from the transport, addressed to one registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportEvent {
    pub subscription_id: SubscriptionId,
    /// Full page replacing whatever the subscription held
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<PageData<EntityData>>,
    /// Incremental values for entities already on the page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updates: Option<Vec<EntityData>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TransportErrorInfo>,
}

impl TransportEvent {
    /// Create a page event
    pub fn page(subscription_id: SubscriptionId, page: PageData<EntityData>) -> Self {
        Self {
            subscription_id,
            page: Some(page),
            updates: None,
            error: None,
        }
    }

    /// Create an update event
    pub fn updates(subscription_id: SubscriptionId, updates: Vec<EntityData>) -> Self {
        Self {
            subscription_id,
            page: None,
            updates: Some(updates),
            error: None,
        }
    }

    /// Create an error event
    pub fn error(subscription_id: SubscriptionId, code: i32, message: impl Into<String>) -> Self {
        Self {
            subscription_id,
            page: None,
            updates: None,
            error: Some(TransportErrorInfo {
                code,
                message: message.into(),
            }),
        }
    }

    /// Same payload, addressed to another registration
    pub fn readdressed(mut self, subscription_id: SubscriptionId) -> Self {
        self.subscription_id = subscription_id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityId, TsValue};

    #[test]
    fn test_wire_shape() {
        let event = TransportEvent::updates(
            3,
            vec![EntityData::new(EntityId::new("device", "d1"))
                .with_latest("temperature", TsValue::new(10, 21.5))],
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["subscriptionId"], 3);
        assert!(value.get("page").is_none());
        assert_eq!(
            value["updates"][0]["latest"]["temperature"]["value"],
            serde_json::json!(21.5)
        );

        let back: TransportEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }
}
