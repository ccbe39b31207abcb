//! Consumer adapters
//!
//! A [`ConsumerAdapter`] binds one component's lifetime to the shared
//! client. Mounting registers a wildcard handler and the three lifecycle
//! callbacks; unmounting (or dropping the adapter) releases exactly those
//! registrations, so repeated mount/unmount cycles never leak handlers.
//!
//! The adapter only closes the shared connection on teardown when it was
//! the one that opened it through auto-connect.

use super::RealtimeClient;
use super::gateway::OutboundGateway;
use super::registry::{Handler, Subscription, handler};
use crate::core::{Message, TransportError, event_types::WILDCARD};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

type MessageCallback = Arc<dyn Fn(&Message) + Send + Sync>;
type StateCallback = Arc<dyn Fn() + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&TransportError) + Send + Sync>;

/// Mount-time options for a [`ConsumerAdapter`]
///
/// Unset values fall back to the client's `consumer` configuration.
#[derive(Clone, Default)]
pub struct ConsumerOptions {
    address: Option<String>,
    auto_connect: Option<bool>,
    recent_messages: Option<usize>,
    on_message: Option<MessageCallback>,
    on_connect: Option<StateCallback>,
    on_disconnect: Option<StateCallback>,
    on_error: Option<ErrorCallback>,
    unbuffered: bool,
}

impl ConsumerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect here instead of the configured default address
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = Some(auto_connect);
        self
    }

    /// Capacity of the recent-message buffer (at least 1)
    pub fn recent_messages(mut self, capacity: usize) -> Self {
        self.recent_messages = Some(capacity.max(1));
        self
    }

    /// Skip the recent-message buffer
    pub(crate) fn without_buffer(mut self) -> Self {
        self.unbuffered = true;
        self
    }

    pub fn on_message<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(callback));
        self
    }

    pub fn on_connect<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(callback));
        self
    }

    pub fn on_disconnect<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Arc::new(callback));
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&TransportError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for ConsumerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerOptions")
            .field("address", &self.address)
            .field("auto_connect", &self.auto_connect)
            .field("recent_messages", &self.recent_messages)
            .field("unbuffered", &self.unbuffered)
            .finish_non_exhaustive()
    }
}

/// Bounded, arrival-ordered buffer of the latest messages
struct RecentMessages {
    capacity: usize,
    messages: Mutex<VecDeque<Message>>,
}

impl RecentMessages {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            messages: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    fn push(&self, message: Message) {
        let mut messages = self.lock();
        while messages.len() >= self.capacity {
            messages.pop_front();
        }
        messages.push_back(message);
    }

    fn snapshot(&self) -> Vec<Message> {
        self.lock().iter().cloned().collect()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Message>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Per-component binding to the shared client
pub struct ConsumerAdapter {
    id: String,
    client: RealtimeClient,
    address: Option<String>,
    connected: Arc<AtomicBool>,
    last_error: Arc<Mutex<Option<TransportError>>>,
    recent: Arc<RecentMessages>,
    registrations: Vec<Subscription>,
    owns_connection: bool,
}

impl ConsumerAdapter {
    /// Mount a consumer
    ///
    /// Registers a wildcard handler feeding the recent-message buffer plus
    /// connect, disconnect and error callbacks. With auto-connect enabled
    /// and no open connection, connects to the resolved address. The
    /// consumer owns the connection only if that call started the session.
    pub fn mount(client: &RealtimeClient, options: ConsumerOptions) -> Self {
        let id = format!("consumer_{}", Uuid::new_v4().simple());
        let defaults = &client.config().consumer;
        let capacity = if options.unbuffered {
            1
        } else {
            options.recent_messages.unwrap_or(defaults.recent_messages)
        };
        let auto_connect = options.auto_connect.unwrap_or(defaults.auto_connect);

        let connected = Arc::new(AtomicBool::new(client.is_connected()));
        let last_error = Arc::new(Mutex::new(None));
        let recent = Arc::new(RecentMessages::new(capacity));
        let manager = client.manager();

        let mut registrations = Vec::with_capacity(4);

        let buffer = (!options.unbuffered).then(|| recent.clone());
        let on_message = options.on_message.clone();
        if buffer.is_some() || on_message.is_some() {
            registrations.push(client.subscribe(
                WILDCARD,
                handler(move |message| {
                    if let Some(buffer) = &buffer {
                        buffer.push(message.clone());
                    }
                    if let Some(callback) = &on_message {
                        callback(message);
                    }
                    Ok(())
                }),
            ));
        }

        let flag = connected.clone();
        let on_connect = options.on_connect.clone();
        registrations.push(manager.on_connect(move || {
            flag.store(true, Ordering::SeqCst);
            if let Some(callback) = &on_connect {
                callback();
            }
        }));

        let flag = connected.clone();
        let on_disconnect = options.on_disconnect.clone();
        registrations.push(manager.on_disconnect(move || {
            flag.store(false, Ordering::SeqCst);
            if let Some(callback) = &on_disconnect {
                callback();
            }
        }));

        let error_slot = last_error.clone();
        let on_error = options.on_error.clone();
        registrations.push(manager.on_error(move |error| {
            *error_slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(error.clone());
            if let Some(callback) = &on_error {
                callback(error);
            }
        }));

        // A handshake already in flight belongs to whoever started it
        let owns_connection = if auto_connect && !client.is_connected() {
            client.connect(options.address.as_deref())
        } else {
            false
        };

        tracing::debug!(
            consumer_id = %id,
            auto_connect = auto_connect,
            owns_connection = owns_connection,
            "Consumer mounted"
        );

        Self {
            id,
            client: client.clone(),
            address: options.address,
            connected,
            last_error,
            recent,
            registrations,
            owns_connection,
        }
    }

    /// Tear the consumer down
    ///
    /// Equivalent to dropping it.
    pub fn unmount(self) {}

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Connection state as last reported to this consumer
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// The most recent messages, oldest first
    pub fn messages(&self) -> Vec<Message> {
        self.recent.snapshot()
    }

    pub fn message_count(&self) -> usize {
        self.recent.len()
    }

    /// The last transport error reported while mounted
    pub fn last_error(&self) -> Option<TransportError> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Send `data` if connected
    pub fn send_message<T: Serialize + ?Sized>(&self, data: &T) -> bool {
        self.client.send(data)
    }

    /// Connect to `address`, the mount-time address, or the default
    pub fn connect(&self, address: Option<&str>) {
        self.client
            .connect(address.or(self.address.as_deref()));
    }

    pub fn disconnect(&self) {
        self.client.disconnect();
    }

    /// Register an additional handler
    ///
    /// The returned handle is independent of the adapter's own teardown.
    pub fn subscribe(&self, event_type: impl Into<String>, handler: Handler) -> Subscription {
        self.client.subscribe(event_type, handler)
    }

    /// Typed request helpers
    pub fn gateway(&self) -> &OutboundGateway {
        self.client.gateway()
    }
}

impl Drop for ConsumerAdapter {
    fn drop(&mut self) {
        self.registrations.clear();

        if self.owns_connection {
            self.client.disconnect();
        }

        tracing::debug!(consumer_id = %self.id, "Consumer unmounted");
    }
}

impl fmt::Debug for ConsumerAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerAdapter")
            .field("id", &self.id)
            .field("connected", &self.is_connected())
            .field("messages", &self.message_count())
            .field("owns_connection", &self.owns_connection)
            .finish()
    }
}

/// Consumer interested in a single event type
///
/// Auto-connects on mount and exposes only the connection flag; the
/// callback receives every message of `event_type`. No recent-message
/// buffer is kept.
pub struct EventSubscriber {
    // Declared first so the handler goes away before the adapter can
    // close the connection.
    subscription: Subscription,
    adapter: ConsumerAdapter,
}

impl EventSubscriber {
    pub fn mount<F>(client: &RealtimeClient, event_type: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let adapter = ConsumerAdapter::mount(
            client,
            ConsumerOptions::new().auto_connect(true).without_buffer(),
        );
        let subscription = adapter.subscribe(
            event_type,
            handler(move |message| {
                callback(message);
                Ok(())
            }),
        );

        Self {
            subscription,
            adapter,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.adapter.is_connected()
    }

    pub fn unmount(self) {}
}

impl fmt::Debug for EventSubscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSubscriber")
            .field("subscription", &self.subscription)
            .field("adapter", &self.adapter)
            .finish()
    }
}
