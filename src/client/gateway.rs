//! Outbound gateway
//!
//! Serializes client requests and hands them to the open connection. There
//! is no outbound queue: a send while disconnected is dropped with a
//! warning, and callers are expected to re-issue idempotent requests (such
//! as product subscriptions) from an `on_connect` callback.

use super::manager::ConnectionManager;
use super::protocol::{ClientRequest, DEFAULT_ALERT_LIMIT, DEFAULT_DATA_LIMIT};
use serde::Serialize;

/// Client-to-server message sender
#[derive(Debug, Clone)]
pub struct OutboundGateway {
    manager: ConnectionManager,
}

impl OutboundGateway {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    /// Serialize `data` and send it over the open connection
    ///
    /// Returns `true` if the frame was handed to the transport. Never fails:
    /// sends while disconnected and serialization failures are logged and
    /// dropped.
    pub fn send<T: Serialize + ?Sized>(&self, data: &T) -> bool {
        if !self.manager.is_connected() {
            tracing::warn!(state = %self.manager.state(), "Not connected, dropping outbound message");
            return false;
        }

        let frame = match serde_json::to_string(data) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize outbound message");
                return false;
            }
        };

        let sent = self.manager.send_frame(frame);
        if !sent {
            tracing::warn!("Connection closed before the message could be sent");
        }
        sent
    }

    /// Send a typed request
    pub fn request(&self, request: &ClientRequest) -> bool {
        tracing::debug!(request = request.request_type(), "Sending request");
        self.send(request)
    }

    pub fn subscribe_product(&self, product_id: impl Into<String>) -> bool {
        self.request(&ClientRequest::SubscribeProduct {
            product_id: product_id.into(),
        })
    }

    pub fn unsubscribe_product(&self, product_id: impl Into<String>) -> bool {
        self.request(&ClientRequest::UnsubscribeProduct {
            product_id: product_id.into(),
        })
    }

    /// Ask for recent alerts; `None` uses a limit of 50
    pub fn get_alerts(&self, limit: Option<u32>) -> bool {
        self.request(&ClientRequest::GetAlerts {
            limit: limit.unwrap_or(DEFAULT_ALERT_LIMIT),
        })
    }

    /// Ask for the latest measurements; `None` uses a limit of 100
    pub fn get_latest_data(&self, limit: Option<u32>) -> bool {
        self.request(&ClientRequest::GetLatestData {
            limit: limit.unwrap_or(DEFAULT_DATA_LIMIT),
        })
    }
}
