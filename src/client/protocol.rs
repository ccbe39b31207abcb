//! Outbound message protocol
//!
//! Requests sent from the client to the server. Replies, if any, arrive
//! asynchronously as ordinary inbound events and are correlated by event
//! type, never by request id.
//!
//! ```json
//! {"type": "subscribe_product", "product_id": "P-100"}
//! {"type": "unsubscribe_product", "product_id": "P-100"}
//! {"type": "get_alerts", "limit": 50}
//! {"type": "get_latest_data", "limit": 100}
//! ```

use serde::{Deserialize, Serialize};

pub const DEFAULT_ALERT_LIMIT: u32 = 50;
pub const DEFAULT_DATA_LIMIT: u32 = 100;

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Start receiving events for a product
    SubscribeProduct { product_id: String },
    /// Stop receiving events for a product
    UnsubscribeProduct { product_id: String },
    /// Ask for the most recent alerts; answered with `alerts`
    GetAlerts { limit: u32 },
    /// Ask for the most recent measurements; answered with `latest_data`
    GetLatestData { limit: u32 },
}

impl ClientRequest {
    /// The wire `type` of this request
    pub fn request_type(&self) -> &'static str {
        match self {
            ClientRequest::SubscribeProduct { .. } => "subscribe_product",
            ClientRequest::UnsubscribeProduct { .. } => "unsubscribe_product",
            ClientRequest::GetAlerts { .. } => "get_alerts",
            ClientRequest::GetLatestData { .. } => "get_latest_data",
        }
    }
}
