//! Real-time messaging client
//!
//! # Architecture
//!
//! ```text
//!  ConsumerAdapter ──connect()──▶ ConnectionManager ──Connector──▶ transport
//!        │                              │
//!   subscribe(type)               each inbound frame
//!        │                              ▼
//!        └──────▶ SubscriptionRegistry ◀── MessageRouter (snapshot dispatch)
//!
//!  OutboundGateway ──send()──▶ ConnectionManager (open connections only)
//! ```
//!
//! A [`RealtimeClient`] is built once at application start and cloned into
//! every consumer. All clones share one physical connection and one
//! registry; reconnections reuse the registry, so subscriptions survive
//! network interruptions without any action from consumers.

mod builder;
mod callbacks;
pub mod consumer;
pub mod gateway;
pub mod manager;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod transport;

pub use builder::RealtimeClientBuilder;
pub use consumer::{ConsumerAdapter, ConsumerOptions, EventSubscriber};
pub use gateway::OutboundGateway;
pub use manager::{ConnectionManager, ConnectionState, ReconnectPolicy};
pub use protocol::ClientRequest;
pub use registry::{Handler, HandlerResult, Subscription, SubscriptionRegistry, handler};
pub use router::MessageRouter;
pub use transport::{Connector, MemoryConnector, MemoryPeer, TransportConnection, WebSocketConnector};

use crate::config::ClientConfig;
use serde::Serialize;
use std::sync::Arc;

/// The messaging service shared by all consumers
///
/// Cheap to clone. Construct it with [`RealtimeClient::builder`] and call
/// [`shutdown`](Self::shutdown) when the application stops.
#[derive(Clone)]
pub struct RealtimeClient {
    config: Arc<ClientConfig>,
    registry: SubscriptionRegistry,
    manager: ConnectionManager,
    gateway: OutboundGateway,
}

impl RealtimeClient {
    pub fn builder() -> RealtimeClientBuilder {
        RealtimeClientBuilder::new()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn gateway(&self) -> &OutboundGateway {
        &self.gateway
    }

    /// Connect to `address`, or to the configured default address
    ///
    /// Returns `true` if this call started a new session; see
    /// [`ConnectionManager::connect`].
    pub fn connect(&self, address: Option<&str>) -> bool {
        self.manager.connect(&self.config.resolve_address(address))
    }

    pub fn disconnect(&self) {
        self.manager.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    /// Register `handler` for `event_type` (`"*"` for every message)
    pub fn subscribe(&self, event_type: impl Into<String>, handler: Handler) -> Subscription {
        self.registry.subscribe(event_type, handler)
    }

    /// Send `data` if connected; see [`OutboundGateway::send`]
    pub fn send<T: Serialize + ?Sized>(&self, data: &T) -> bool {
        self.gateway.send(data)
    }

    /// Close the connection and drop every registration
    pub fn shutdown(&self) {
        self.manager.disconnect();
        self.registry.clear();
        tracing::info!("Realtime client shut down");
    }
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("manager", &self.manager)
            .field("registry", &self.registry)
            .finish()
    }
}
