//! Transport seam
//!
//! The connection manager never talks to a socket directly. It asks a
//! [`Connector`] to open a [`TransportConnection`]: a sink of outbound text
//! frames plus a stream of inbound text frames. The stream ending means the
//! peer closed; an `Err` item is a transport error and is followed by the
//! close.
//!
//! Two connectors ship with the crate:
//!
//! - [`WebSocketConnector`]: `ws://` / `wss://` via `tokio-tungstenite`
//! - [`MemoryConnector`]: in-process channels, for tests and demos

use crate::core::TransportError;
use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;

/// Outbound half of a connection
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half of a connection
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// An open physical connection
pub struct TransportConnection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl TransportConnection {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

/// Opens physical connections
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a connection to `address`
    ///
    /// The address has already been validated by the manager.
    async fn open(&self, address: &Url) -> Result<TransportConnection, TransportError>;
}

// =============================================================================
// WebSocket
// =============================================================================

/// Connector backed by `tokio-tungstenite`
///
/// Text frames are passed through; ping/pong are answered by tungstenite,
/// and binary frames are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, address: &Url) -> Result<TransportConnection, TransportError> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(address.as_str())
            .await
            .map_err(|e| TransportError::Refused {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        let (ws_write, ws_read) = ws_stream.split();

        let sink = ws_write
            .with(|text: String| {
                future::ready(Ok::<_, tokio_tungstenite::tungstenite::Error>(
                    WsMessage::Text(text.into()),
                ))
            })
            .sink_map_err(TransportError::from);

        let stream = ws_read.filter_map(|frame| {
            future::ready(match frame {
                Ok(WsMessage::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(WsMessage::Close(_)) => {
                    tracing::debug!("Peer sent close frame");
                    None
                }
                Ok(WsMessage::Binary(bytes)) => {
                    tracing::debug!(len = bytes.len(), "Ignoring binary frame");
                    None
                }
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::from(e))),
            })
        });

        Ok(TransportConnection::new(Box::pin(sink), Box::pin(stream)))
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// Server side of an in-memory connection
///
/// Dropping the peer (or calling [`MemoryPeer::close`]) closes the
/// connection from the server side.
pub struct MemoryPeer {
    address: Url,
    inbound: Option<mpsc::UnboundedSender<Result<String, TransportError>>>,
    outbound: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    /// Address the client connected to
    pub fn address(&self) -> &Url {
        &self.address
    }

    /// Push a text frame to the client
    ///
    /// Returns `false` if the connection is already closed.
    pub fn send_text(&self, frame: impl Into<String>) -> bool {
        match &self.inbound {
            Some(tx) => tx.send(Ok(frame.into())).is_ok(),
            None => false,
        }
    }

    /// Push a JSON value to the client
    pub fn send_json(&self, value: &serde_json::Value) -> bool {
        self.send_text(value.to_string())
    }

    /// Report a transport error to the client and drop the connection
    pub fn fail(&mut self, error: TransportError) {
        if let Some(tx) = self.inbound.take() {
            let _ = tx.send(Err(error));
        }
    }

    /// Close the connection from the server side
    pub fn close(&mut self) {
        self.inbound = None;
    }

    /// Wait for the next frame written by the client
    ///
    /// Returns `None` once the client side has closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// Next frame written by the client, if one is already queued
    pub fn try_recv(&mut self) -> Option<String> {
        self.outbound.try_recv().ok()
    }
}

#[derive(Default)]
struct MemoryState {
    attempts: Vec<Url>,
    refusals: VecDeque<TransportError>,
    refuse_all: bool,
}

/// Connector that hands the server side of each connection to the test
///
/// ```rust,ignore
/// let (connector, mut peers) = MemoryConnector::new();
/// let client = RealtimeClient::builder().with_connector(connector).build()?;
/// client.connect(None);
/// let peer = peers.recv().await.unwrap();
/// peer.send_json(&json!({"type": "spc_alert", "data": {"id": 1}}));
/// ```
#[derive(Clone)]
pub struct MemoryConnector {
    state: Arc<Mutex<MemoryState>>,
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

impl MemoryConnector {
    /// Create a connector and the receiver of accepted peers
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            peers,
        };
        (connector, rx)
    }

    /// Refuse the next open attempt with `error`
    ///
    /// Queued refusals are consumed in order, one per attempt.
    pub fn refuse_next(&self, error: TransportError) {
        self.state().refusals.push_back(error);
    }

    /// Refuse every open attempt until switched off again
    pub fn refuse_all(&self, refuse: bool) {
        self.state().refuse_all = refuse;
    }

    /// Number of open attempts so far, refused ones included
    pub fn attempts(&self) -> usize {
        self.state().attempts.len()
    }

    /// Addresses of every open attempt, in order
    pub fn attempted_addresses(&self) -> Vec<Url> {
        self.state().attempts.clone()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, address: &Url) -> Result<TransportConnection, TransportError> {
        {
            let mut state = self.state();
            state.attempts.push(address.clone());

            if let Some(error) = state.refusals.pop_front() {
                return Err(error);
            }
            if state.refuse_all {
                return Err(TransportError::Refused {
                    address: address.to_string(),
                    reason: "connection refused".to_string(),
                });
            }
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();

        let peer = MemoryPeer {
            address: address.clone(),
            inbound: Some(inbound_tx),
            outbound: outbound_rx,
        };
        self.peers.send(peer).map_err(|_| TransportError::Refused {
            address: address.to_string(),
            reason: "no peer listening".to_string(),
        })?;

        let sink = futures::sink::unfold(outbound_tx, |tx, frame: String| async move {
            tx.send(frame)
                .map_err(|_| TransportError::Send("peer dropped".to_string()))?;
            Ok::<_, TransportError>(tx)
        });
        let stream = UnboundedReceiverStream::new(inbound_rx);

        Ok(TransportConnection::new(Box::pin(sink), Box::pin(stream)))
    }
}
