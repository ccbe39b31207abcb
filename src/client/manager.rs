//! Connection manager
//!
//! The `ConnectionManager` owns the single physical connection of a client,
//! drives its lifecycle and applies the reconnection policy. Everything that
//! touches the transport runs on one session task, so inbound frames are
//! dispatched in the order the transport delivers them.
//!
//! # State machine
//!
//! ```text
//!            connect()                 transport open
//!   Idle ─────────────▶ Connecting ─────────────────────▶ Open
//!                          ▲  │ open failed                 │ peer closed / error
//!                          │  ▼                             ▼
//!          retry timer     │ Closed ◀──────────────────── Closing
//!          (fixed delay,   │  │
//!           max attempts) ─┘  └── disconnect() / retries exhausted: stays Closed
//! ```
//!
//! Each `connect()` starts a new session and bumps a generation counter.
//! Events from a superseded session are ignored, which is what keeps a
//! late close from a manually closed connection from scheduling a retry.

use super::callbacks::{CallbackList, run_isolated};
use super::registry::Subscription;
use super::router::MessageRouter;
use super::transport::{Connector, TransportConnection};
use crate::config::{ReconnectConfig, validate_address};
use crate::core::TransportError;
use futures::{SinkExt, StreamExt};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

/// Lifecycle state of the physical connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected
    Idle,
    Connecting,
    Open,
    /// The transport dropped and is being torn down
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Fixed-delay reconnection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Automatic attempts allowed between two successful opens
    pub max_attempts: u32,
    /// Wait before each automatic attempt
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_millis(5000),
        }
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            delay: Duration::from_millis(config.delay_ms),
        }
    }
}

type LifecycleCallback = dyn Fn() + Send + Sync;
type ErrorCallback = dyn Fn(&TransportError) + Send + Sync;

/// Commands from the public API to the session task
enum Outbound {
    Frame(String),
    Close,
}

struct Slot {
    state: ConnectionState,
    address: Option<Url>,
    retry_count: u32,
    manual_close: bool,
    generation: u64,
    /// Present only while the connection is open
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    task: Option<JoinHandle<()>>,
}

struct Shared {
    connector: Arc<dyn Connector>,
    router: MessageRouter,
    policy: ReconnectPolicy,
    runtime: Handle,
    slot: Mutex<Slot>,
    on_connect: CallbackList<LifecycleCallback>,
    on_disconnect: CallbackList<LifecycleCallback>,
    on_error: CallbackList<ErrorCallback>,
}

/// Owner of the single physical connection
///
/// Cheap to clone; clones drive the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Create a manager
    ///
    /// Session tasks are spawned on `runtime`.
    pub fn new(
        connector: Arc<dyn Connector>,
        router: MessageRouter,
        policy: ReconnectPolicy,
        runtime: Handle,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                connector,
                router,
                policy,
                runtime,
                slot: Mutex::new(Slot {
                    state: ConnectionState::Idle,
                    address: None,
                    retry_count: 0,
                    manual_close: false,
                    generation: 0,
                    outbound: None,
                    task: None,
                }),
                on_connect: CallbackList::new(),
                on_disconnect: CallbackList::new(),
                on_error: CallbackList::new(),
            }),
        }
    }

    /// Open the connection to `address`
    ///
    /// A no-op while already open or connecting to the same address. A
    /// different address replaces the current connection. An address that
    /// cannot be opened is logged and otherwise ignored; it is not retried.
    ///
    /// Returns `true` if this call started a new session.
    pub fn connect(&self, address: &str) -> bool {
        let url = match validate_address(address) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(address = %address, error = %e, "Cannot open connection");
                let mut slot = self.shared.slot();
                if slot.state == ConnectionState::Idle {
                    slot.state = ConnectionState::Closed;
                }
                return false;
            }
        };

        let mut slot = self.shared.slot();
        if matches!(slot.state, ConnectionState::Open | ConnectionState::Connecting)
            && slot.address.as_ref() == Some(&url)
        {
            tracing::debug!(address = %url, state = %slot.state, "Already connected, ignoring connect");
            return false;
        }

        let replaced_open = self.shared.release_session(&mut slot);
        slot.manual_close = false;
        slot.retry_count = 0;
        slot.address = Some(url.clone());
        slot.state = ConnectionState::Connecting;

        let generation = slot.generation;
        let shared = self.shared.clone();
        let session_url = url.clone();
        slot.task = Some(
            self.shared
                .runtime
                .spawn(async move { shared.run_session(generation, session_url).await }),
        );
        drop(slot);

        tracing::info!(address = %url, "Connecting");

        if replaced_open {
            self.shared.fire_disconnect();
        }
        true
    }

    /// Close the connection and stop reconnecting
    ///
    /// Cancels a pending handshake or reconnect timer. No automatic
    /// reconnection follows until [`connect`](Self::connect) is called again.
    pub fn disconnect(&self) {
        let was_open = {
            let mut slot = self.shared.slot();
            slot.manual_close = true;
            let was_open = self.shared.release_session(&mut slot);
            if slot.state != ConnectionState::Idle {
                slot.state = ConnectionState::Closed;
            }
            was_open
        };

        tracing::info!("Disconnected by caller");

        if was_open {
            self.shared.fire_disconnect();
        }
    }

    /// `true` iff the connection is open
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.slot().state
    }

    /// Automatic attempts made since the last successful open
    pub fn retry_count(&self) -> u32 {
        self.shared.slot().retry_count
    }

    /// Address of the current or last connection
    pub fn address(&self) -> Option<Url> {
        self.shared.slot().address.clone()
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.shared.policy
    }

    pub fn router(&self) -> &MessageRouter {
        &self.shared.router
    }

    /// Register a callback fired each time the connection opens
    pub fn on_connect<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.on_connect.register(Arc::new(callback))
    }

    /// Register a callback fired each time the connection closes
    pub fn on_disconnect<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.on_disconnect.register(Arc::new(callback))
    }

    /// Register a callback fired with each transport error
    pub fn on_error<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&TransportError) + Send + Sync + 'static,
    {
        self.shared.on_error.register(Arc::new(callback))
    }

    /// Number of registered lifecycle callbacks (connect, disconnect, error)
    pub fn callback_counts(&self) -> (usize, usize, usize) {
        (
            self.shared.on_connect.len(),
            self.shared.on_disconnect.len(),
            self.shared.on_error.len(),
        )
    }

    /// Hand a serialized frame to the open transport
    ///
    /// Returns `false` when there is no open connection.
    pub(crate) fn send_frame(&self, frame: String) -> bool {
        let slot = self.shared.slot();
        if slot.state != ConnectionState::Open {
            return false;
        }
        slot.outbound
            .as_ref()
            .is_some_and(|tx| tx.send(Outbound::Frame(frame)).is_ok())
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.shared.slot();
        f.debug_struct("ConnectionManager")
            .field("state", &slot.state)
            .field("address", &slot.address.as_ref().map(Url::as_str))
            .field("retry_count", &slot.retry_count)
            .field("manual_close", &slot.manual_close)
            .finish()
    }
}

impl Shared {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.slot().generation == generation
    }

    /// Detach the current session, closing its transport
    ///
    /// An open transport is asked to close gracefully; a session that is
    /// handshaking, waiting to retry or still closing is aborted. Returns
    /// whether disconnect callbacks are still owed for this session.
    fn release_session(&self, slot: &mut Slot) -> bool {
        slot.generation += 1;
        let was_open = matches!(slot.state, ConnectionState::Open | ConnectionState::Closing);

        match slot.outbound.take() {
            Some(tx) => {
                let _ = tx.send(Outbound::Close);
                slot.task = None;
            }
            None => {
                if let Some(task) = slot.task.take() {
                    task.abort();
                }
            }
        }

        was_open
    }

    async fn run_session(self: Arc<Self>, generation: u64, address: Url) {
        loop {
            self.run_connection(generation, &address).await;

            let Some(delay) = self.after_close(generation, &address) else {
                break;
            };
            tokio::time::sleep(delay).await;

            if !self.begin_retry(generation, &address) {
                break;
            }
        }
    }

    async fn run_connection(&self, generation: u64, address: &Url) {
        let conn = match self.connector.open(address).await {
            Ok(conn) => conn,
            Err(e) => {
                self.fire_error(generation, &e);
                return;
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        if !self.on_open(generation, address, tx) {
            let mut sink = conn.sink;
            let _ = sink.close().await;
            return;
        }

        self.pump(generation, conn, &mut rx).await;
    }

    async fn pump(
        &self,
        generation: u64,
        conn: TransportConnection,
        outbound: &mut mpsc::UnboundedReceiver<Outbound>,
    ) {
        let TransportConnection {
            mut sink,
            mut stream,
        } = conn;

        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(text)) => {
                        self.router.dispatch(&text);
                    }
                    Some(Err(e)) => {
                        self.fire_error(generation, &e);
                        break;
                    }
                    None => {
                        tracing::debug!("Transport closed by peer");
                        break;
                    }
                },
                command = outbound.recv() => match command {
                    Some(Outbound::Frame(text)) => {
                        if let Err(e) = sink.send(text).await {
                            self.fire_error(generation, &e);
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        tracing::debug!("Closing transport");
                        break;
                    }
                },
            }
        }

        self.mark_closing(generation);
        if let Err(e) = sink.close().await {
            tracing::debug!(error = %e, "Transport close did not complete cleanly");
        }
    }

    fn on_open(&self, generation: u64, address: &Url, tx: mpsc::UnboundedSender<Outbound>) -> bool {
        {
            let mut slot = self.slot();
            if slot.generation != generation {
                return false;
            }
            slot.state = ConnectionState::Open;
            slot.retry_count = 0;
            slot.outbound = Some(tx);
        }

        tracing::info!(address = %address, "Connection open");

        for callback in self.on_connect.snapshot() {
            run_isolated("connect", || callback());
        }
        true
    }

    fn mark_closing(&self, generation: u64) {
        let mut slot = self.slot();
        if slot.generation == generation && slot.state == ConnectionState::Open {
            slot.state = ConnectionState::Closing;
            slot.outbound = None;
        }
    }

    /// Settle a closed transport and decide whether to retry
    fn after_close(&self, generation: u64, address: &Url) -> Option<Duration> {
        let (retry, attempt) = {
            let mut slot = self.slot();
            if slot.generation != generation {
                return None;
            }
            slot.state = ConnectionState::Closed;
            slot.outbound = None;

            if !slot.manual_close && slot.retry_count < self.policy.max_attempts {
                slot.retry_count += 1;
                (true, slot.retry_count)
            } else {
                (false, slot.retry_count)
            }
        };

        self.fire_disconnect();

        if retry {
            tracing::info!(
                address = %address,
                attempt = attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = self.policy.delay.as_millis() as u64,
                "Connection closed, reconnect scheduled"
            );
            Some(self.policy.delay)
        } else {
            tracing::info!(
                address = %address,
                attempts = attempt,
                "Connection closed, reconnect attempts exhausted"
            );
            None
        }
    }

    fn begin_retry(&self, generation: u64, address: &Url) -> bool {
        let attempt = {
            let mut slot = self.slot();
            if slot.generation != generation || slot.manual_close {
                return false;
            }
            slot.state = ConnectionState::Connecting;
            slot.retry_count
        };

        tracing::info!(address = %address, attempt = attempt, "Reconnecting");
        true
    }

    fn fire_disconnect(&self) {
        for callback in self.on_disconnect.snapshot() {
            run_isolated("disconnect", || callback());
        }
    }

    fn fire_error(&self, generation: u64, error: &TransportError) {
        if !self.is_current(generation) {
            return;
        }

        tracing::warn!(error = %error, code = error.error_code(), "Transport error");

        for callback in self.on_error.snapshot() {
            run_isolated("error", || callback(error));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::registry::{SubscriptionRegistry, handler};
    use crate::client::transport::{FrameSink, MemoryConnector, MemoryPeer};
    use async_trait::async_trait;
    use futures::Sink;
    use serde_json::json;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};

    const ADDR: &str = "ws://plant.local:8000/ws/realtime/";

    type Harness = (
        ConnectionManager,
        MemoryConnector,
        mpsc::UnboundedReceiver<MemoryPeer>,
        SubscriptionRegistry,
    );

    fn manager_with(policy: ReconnectPolicy) -> Harness {
        let (connector, peers) = MemoryConnector::new();
        let registry = SubscriptionRegistry::new();
        let manager = ConnectionManager::new(
            Arc::new(connector.clone()),
            MessageRouter::new(registry.clone()),
            policy,
            Handle::current(),
        );
        (manager, connector, peers, registry)
    }

    fn manager() -> Harness {
        manager_with(ReconnectPolicy::default())
    }

    /// Sink whose close handshake never completes, like a half-dead TCP link
    struct StallOnClose(FrameSink);

    impl Sink<String> for StallOnClose {
        type Error = TransportError;

        fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            self.0.as_mut().poll_ready(cx)
        }

        fn start_send(mut self: Pin<&mut Self>, item: String) -> Result<(), Self::Error> {
            self.0.as_mut().start_send(item)
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            self.0.as_mut().poll_flush(cx)
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }
    }

    struct StallingConnector(MemoryConnector);

    #[async_trait]
    impl Connector for StallingConnector {
        async fn open(&self, address: &Url) -> Result<TransportConnection, TransportError> {
            let conn = self.0.open(address).await?;
            Ok(TransportConnection::new(
                Box::pin(StallOnClose(conn.sink)),
                conn.stream,
            ))
        }
    }

    fn stalling_manager() -> Harness {
        let (connector, peers) = MemoryConnector::new();
        let registry = SubscriptionRegistry::new();
        let manager = ConnectionManager::new(
            Arc::new(StallingConnector(connector.clone())),
            MessageRouter::new(registry.clone()),
            ReconnectPolicy::default(),
            Handle::current(),
        );
        (manager, connector, peers, registry)
    }

    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        (count, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_opens_and_fires_callbacks() {
        let (cm, _connector, mut peers, _registry) = manager();
        let (connects, on_connect) = counter();
        let _sub = cm.on_connect(on_connect);

        assert_eq!(cm.state(), ConnectionState::Idle);
        cm.connect(ADDR);
        assert_eq!(cm.state(), ConnectionState::Connecting);

        let peer = peers.recv().await.unwrap();
        assert_eq!(peer.address().as_str(), ADDR);
        settle().await;

        assert!(cm.is_connected());
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert_eq!(cm.retry_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_same_address_is_noop() {
        let (cm, connector, mut peers, _registry) = manager();

        cm.connect(ADDR);
        cm.connect(ADDR);
        let _peer = peers.recv().await.unwrap();
        settle().await;
        cm.connect(ADDR);
        settle().await;

        assert_eq!(connector.attempts(), 1);
        assert!(cm.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_new_address_replaces_connection() {
        let (cm, connector, mut peers, _registry) = manager();
        let (disconnects, on_disconnect) = counter();
        let _sub = cm.on_disconnect(on_disconnect);

        cm.connect(ADDR);
        let mut first = peers.recv().await.unwrap();
        settle().await;

        cm.connect("ws://backup.local:8000/ws/realtime/");
        let second = peers.recv().await.unwrap();
        settle().await;

        assert_eq!(connector.attempts(), 2);
        assert_eq!(second.address().host_str(), Some("backup.local"));
        assert_eq!(first.recv().await, None);
        assert!(cm.is_connected());
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_address_is_not_retried() {
        let (cm, connector, _peers, _registry) = manager();

        cm.connect("not a url");
        cm.connect("http://plant.local/ws/realtime/");
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(connector.attempts(), 0);
        assert_eq!(cm.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_close_schedules_one_reconnect_after_delay() {
        let (cm, connector, mut peers, _registry) = manager();

        cm.connect(ADDR);
        let mut peer = peers.recv().await.unwrap();
        settle().await;

        peer.close();
        settle().await;

        assert_eq!(cm.state(), ConnectionState::Closed);
        assert_eq!(cm.retry_count(), 1);
        assert_eq!(connector.attempts(), 1);

        tokio::time::advance(Duration::from_millis(4999)).await;
        settle().await;
        assert_eq!(connector.attempts(), 1);

        tokio::time::advance(Duration::from_millis(1)).await;
        let _peer = peers.recv().await.unwrap();
        settle().await;

        assert_eq!(connector.attempts(), 2);
        assert!(cm.is_connected());
        assert_eq!(cm.retry_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_stop_after_max_attempts() {
        let (cm, connector, _peers, _registry) = manager();
        connector.refuse_all(true);

        cm.connect(ADDR);
        tokio::time::sleep(Duration::from_secs(600)).await;

        // initial attempt + 10 automatic retries
        assert_eq!(connector.attempts(), 11);
        assert_eq!(cm.retry_count(), 10);
        assert_eq!(cm.state(), ConnectionState::Closed);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(connector.attempts(), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_connect_recovers_after_exhaustion() {
        let policy = ReconnectPolicy {
            max_attempts: 2,
            delay: Duration::from_millis(100),
        };
        let (cm, connector, mut peers, _registry) = manager_with(policy);
        connector.refuse_all(true);

        cm.connect(ADDR);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(connector.attempts(), 3);

        connector.refuse_all(false);
        cm.connect(ADDR);
        let _peer = peers.recv().await.unwrap();
        settle().await;

        assert!(cm.is_connected());
        assert_eq!(connector.attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_disconnect_prevents_reconnect() {
        let (cm, connector, mut peers, _registry) = manager();
        let (disconnects, on_disconnect) = counter();
        let _sub = cm.on_disconnect(on_disconnect);

        cm.connect(ADDR);
        let mut peer = peers.recv().await.unwrap();
        settle().await;

        cm.disconnect();
        assert_eq!(cm.state(), ConnectionState::Closed);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);

        // The client side closes the transport
        assert_eq!(peer.recv().await, None);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_retry() {
        let (cm, connector, mut peers, _registry) = manager();

        cm.connect(ADDR);
        let mut peer = peers.recv().await.unwrap();
        settle().await;

        peer.close();
        settle().await;
        assert_eq!(cm.retry_count(), 1);

        cm.disconnect();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(connector.attempts(), 1);
        assert_eq!(cm.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_callbacks_then_close_drives_state() {
        let (cm, _connector, mut peers, _registry) = manager();
        let seen: Arc<Mutex<Vec<TransportError>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_in = seen.clone();
        let _sub = cm.on_error(move |e| seen_in.lock().unwrap().push(e.clone()));

        cm.connect(ADDR);
        let mut peer = peers.recv().await.unwrap();
        settle().await;

        peer.fail(TransportError::Reset("cable pulled".to_string()));
        settle().await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![TransportError::Reset("cable pulled".to_string())]
        );
        assert_eq!(cm.state(), ConnectionState::Closed);
        assert_eq!(cm.retry_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_handshake_reports_error_and_close() {
        let (cm, connector, _peers, _registry) = manager();
        connector.refuse_next(TransportError::Refused {
            address: ADDR.to_string(),
            reason: "connection refused".to_string(),
        });
        let (errors, on_error_count) = counter();
        let (disconnects, on_disconnect) = counter();
        let _e = cm.on_error(move |_| on_error_count());
        let _d = cm.on_disconnect(on_disconnect);

        cm.connect(ADDR);
        settle().await;

        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(cm.retry_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_connect_callback_is_isolated() {
        let (cm, _connector, mut peers, _registry) = manager();
        let (connects, on_connect) = counter();
        let _boom = cm.on_connect(|| panic!("callback exploded"));
        let _ok = cm.on_connect(on_connect);

        cm.connect(ADDR);
        let _peer = peers.recv().await.unwrap();
        settle().await;

        assert!(cm.is_connected());
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_frames_reach_registry() {
        let (cm, _connector, mut peers, registry) = manager();
        let received = Arc::new(AtomicUsize::new(0));
        let received_in = received.clone();
        let _sub = registry.subscribe(
            "spc_alert",
            handler(move |_| {
                received_in.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        cm.connect(ADDR);
        let peer = peers.recv().await.unwrap();
        settle().await;

        peer.send_json(&json!({"type": "spc_alert", "data": {"id": 1}}));
        peer.send_text("garbage");
        peer.send_json(&json!({"type": "spc_alert", "data": {"id": 2}}));
        settle().await;

        assert_eq!(received.load(Ordering::SeqCst), 2);
        assert!(cm.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_frame_requires_open_connection() {
        let (cm, _connector, mut peers, _registry) = manager();
        assert!(!cm.send_frame("early".to_string()));

        cm.connect(ADDR);
        let mut peer = peers.recv().await.unwrap();
        settle().await;

        assert!(cm.send_frame("hello".to_string()));
        assert_eq!(peer.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_released_callbacks_are_not_fired() {
        let (cm, _connector, mut peers, _registry) = manager();
        let (connects, on_connect) = counter();
        let mut sub = cm.on_connect(on_connect);
        assert_eq!(cm.callback_counts(), (1, 0, 0));

        sub.unsubscribe();
        assert_eq!(cm.callback_counts(), (0, 0, 0));

        cm.connect(ADDR);
        let _peer = peers.recv().await.unwrap();
        settle().await;
        assert_eq!(connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_reports_whether_it_started_a_session() {
        let (cm, connector, mut peers, _registry) = manager();

        assert!(!cm.connect("not a url"));
        assert!(cm.connect(ADDR));
        assert!(!cm.connect(ADDR));

        let _peer = peers.recv().await.unwrap();
        settle().await;
        assert!(!cm.connect(ADDR));

        assert!(cm.connect("ws://backup.local:8000/ws/realtime/"));
        let _backup = peers.recv().await.unwrap();
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_while_closing_fires_disconnect() {
        let (cm, connector, mut peers, _registry) = stalling_manager();
        let (disconnects, on_disconnect) = counter();
        let _sub = cm.on_disconnect(on_disconnect);

        cm.connect(ADDR);
        let mut peer = peers.recv().await.unwrap();
        settle().await;

        peer.close();
        settle().await;
        assert_eq!(cm.state(), ConnectionState::Closing);
        assert_eq!(disconnects.load(Ordering::SeqCst), 0);

        cm.disconnect();
        assert_eq!(cm.state(), ConnectionState::Closed);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replacing_a_closing_connection_fires_disconnect() {
        let (cm, _connector, mut peers, _registry) = stalling_manager();
        let (disconnects, on_disconnect) = counter();
        let _sub = cm.on_disconnect(on_disconnect);

        cm.connect(ADDR);
        let mut peer = peers.recv().await.unwrap();
        settle().await;

        peer.close();
        settle().await;
        assert_eq!(cm.state(), ConnectionState::Closing);

        assert!(cm.connect("ws://backup.local:8000/ws/realtime/"));
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);

        let _backup = peers.recv().await.unwrap();
        settle().await;
        assert!(cm.is_connected());
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }
}
