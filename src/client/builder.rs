//! RealtimeClientBuilder for assembling a client

use super::RealtimeClient;
use super::gateway::OutboundGateway;
use super::manager::{ConnectionManager, ReconnectPolicy};
use super::registry::SubscriptionRegistry;
use super::router::MessageRouter;
use super::transport::{Connector, WebSocketConnector};
use crate::config::ClientConfig;
use crate::core::RealtimeError;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Builder for [`RealtimeClient`]
///
/// # Example
///
/// ```ignore
/// let client = RealtimeClient::builder()
///     .with_config(ClientConfig::from_yaml_file("realtime.yaml")?.apply_env_overrides())
///     .build()?;
///
/// client.connect(None);
/// ```
pub struct RealtimeClientBuilder {
    config: ClientConfig,
    connector: Option<Arc<dyn Connector>>,
    policy: Option<ReconnectPolicy>,
    runtime: Option<Handle>,
}

impl RealtimeClientBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            connector: None,
            policy: None,
            runtime: None,
        }
    }

    /// Use `config` instead of the defaults
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the WebSocket connector (e.g. with a `MemoryConnector`)
    pub fn with_connector(mut self, connector: impl Connector) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Override the reconnection policy from the configuration
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Spawn connection tasks on `runtime` instead of the current one
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Build the client
    ///
    /// Fails if the configuration is invalid or if no runtime was given and
    /// the caller is not inside a Tokio runtime.
    pub fn build(self) -> Result<RealtimeClient, RealtimeError> {
        self.config.validate()?;

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|e| RealtimeError::NoRuntime(e.to_string()))?,
        };

        let policy = self
            .policy
            .unwrap_or_else(|| ReconnectPolicy::from(&self.config.reconnect));
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WebSocketConnector));

        let registry = SubscriptionRegistry::new();
        let router = MessageRouter::new(registry.clone());
        let manager = ConnectionManager::new(connector, router, policy, runtime);
        let gateway = OutboundGateway::new(manager.clone());

        tracing::debug!(
            address = %self.config.resolve_address(None),
            max_attempts = policy.max_attempts,
            "Realtime client built"
        );

        Ok(RealtimeClient {
            config: Arc::new(self.config),
            registry,
            manager,
            gateway,
        })
    }
}

impl Default for RealtimeClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
