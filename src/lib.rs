//! # QMS Realtime
//!
//! Real-time messaging client for the quality-management dashboard.
//!
//! One shared connection to the server's `/ws/realtime/` endpoint carries
//! SPC alerts, KPI updates and measurements. Consumers subscribe to event
//! types, receive every matching message in arrival order, and keep their
//! subscriptions across reconnections.
//!
//! ## Features
//!
//! - **Single shared connection**: one physical connection per client, however many consumers
//! - **Typed events**: known event types decode into typed payloads, unknown ones pass through
//! - **Wildcard subscriptions**: `"*"` receives every message after the type-specific handlers
//! - **Automatic reconnection**: fixed delay, bounded attempts, cancelled by `disconnect()`
//! - **Fault isolation**: a failing or panicking handler never affects the others
//! - **Scoped registrations**: dropping a [`Subscription`](client::Subscription) unregisters it
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use realtime::prelude::*;
//!
//! realtime::logging::init();
//!
//! let client = RealtimeClient::builder()
//!     .with_config(ClientConfig::from_yaml_file("realtime.yaml")?.apply_env_overrides())
//!     .build()?;
//!
//! let _alerts = client.subscribe(
//!     event_types::SPC_ALERT,
//!     handler(|message| {
//!         if let Message::SpcAlert(alert) = message {
//!             println!("alert {} on {:?}", alert.id, alert.product_id);
//!         }
//!         Ok(())
//!     }),
//! );
//!
//! client.connect(None);
//! client.gateway().get_alerts(None);
//! ```

pub mod client;
pub mod config;
pub mod core;
pub mod logging;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Client ===
    pub use crate::client::{
        ClientRequest, ConnectionManager, ConnectionState, Connector, ConsumerAdapter,
        ConsumerOptions, EventSubscriber, Handler, HandlerResult, MemoryConnector, MemoryPeer,
        MessageRouter, OutboundGateway, RealtimeClient, RealtimeClientBuilder, ReconnectPolicy,
        Subscription, SubscriptionRegistry, TransportConnection, WebSocketConnector, handler,
    };

    // === Configuration ===
    pub use crate::config::{ClientConfig, ConsumerConfig, EndpointConfig, ReconnectConfig};

    // === Events and errors ===
    pub use crate::core::{
        ConfigError, DecodeError, KpiUpdate, Measurement, Message, RealtimeError, SpcAlert,
        TransportError, event_types,
    };

    // === External re-exports ===
    pub use anyhow::Result;
    pub use serde_json::{Value, json};
}
