//! Typed error handling for the real-time client
//!
//! Nothing on the client's runtime path returns these errors to callers:
//! transport and decode failures are absorbed, logged and surfaced through
//! lifecycle callbacks. The types exist so that callbacks, logs and the few
//! fallible setup calls (building a client, loading configuration) can be
//! matched precisely instead of carrying strings around.
//!
//! # Error Categories
//!
//! - [`TransportError`]: the physical connection failed or was refused
//! - [`DecodeError`]: an inbound frame could not be turned into a `Message`
//! - [`ConfigError`]: configuration or address problems
//!
//! # Example
//!
//! ```rust,ignore
//! use realtime::prelude::*;
//!
//! let _guard = client.manager().on_error(|err: &TransportError| {
//!     match err {
//!         TransportError::Refused { address, .. } => eprintln!("{address} is down"),
//!         other => eprintln!("transport failure: {other}"),
//!     }
//! });
//! ```

use thiserror::Error;

/// The umbrella error type for the crate
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Transport-level failures
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Inbound frame decoding failures
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Configuration failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The client was built outside of a Tokio runtime
    #[error("no Tokio runtime available: {0}")]
    NoRuntime(String),
}

impl RealtimeError {
    /// Get the error code for programmatic handling
    pub fn error_code(&self) -> &'static str {
        match self {
            RealtimeError::Transport(e) => e.error_code(),
            RealtimeError::Decode(e) => e.error_code(),
            RealtimeError::Config(e) => e.error_code(),
            RealtimeError::NoRuntime(_) => "NO_RUNTIME",
        }
    }
}

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors raised by the physical connection
///
/// Cloneable so the same error value can be handed to every error callback.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The peer refused or could not complete the handshake
    #[error("connection to {address} refused: {reason}")]
    Refused { address: String, reason: String },

    /// The connection was reset or broke while open
    #[error("connection reset: {0}")]
    Reset(String),

    /// Writing a frame failed
    #[error("failed to send frame: {0}")]
    Send(String),

    /// The peer violated the WebSocket protocol
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl TransportError {
    pub fn error_code(&self) -> &'static str {
        match self {
            TransportError::Refused { .. } => "TRANSPORT_REFUSED",
            TransportError::Reset(_) => "TRANSPORT_RESET",
            TransportError::Send(_) => "TRANSPORT_SEND_FAILED",
            TransportError::Protocol(_) => "TRANSPORT_PROTOCOL",
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;

        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                TransportError::Reset("connection already closed".to_string())
            }
            WsError::Io(e) => TransportError::Reset(e.to_string()),
            WsError::Protocol(e) => TransportError::Protocol(e.to_string()),
            other => TransportError::Protocol(other.to_string()),
        }
    }
}

// =============================================================================
// Decode Errors
// =============================================================================

/// Errors raised while decoding an inbound frame
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame is not valid JSON
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The frame is valid JSON but not an object
    #[error("frame is not a JSON object")]
    NotAnObject,

    /// The frame has no string `type` field
    #[error("frame has no string `type` field")]
    MissingType,
}

impl DecodeError {
    pub fn error_code(&self) -> &'static str {
        match self {
            DecodeError::Malformed(_) => "DECODE_MALFORMED",
            DecodeError::NotAnObject => "DECODE_NOT_AN_OBJECT",
            DecodeError::MissingType => "DECODE_MISSING_TYPE",
        }
    }
}

// =============================================================================
// Config Errors
// =============================================================================

/// Errors related to configuration and address resolution
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The address cannot be used to open a WebSocket
    #[error("invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// A configuration value is out of range
    #[error("invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ConfigError::InvalidAddress { .. } => "INVALID_ADDRESS",
            ConfigError::InvalidValue { .. } => "INVALID_CONFIG_VALUE",
        }
    }
}
