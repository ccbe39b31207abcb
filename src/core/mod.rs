//! Core module containing the message model and error types

pub mod error;
pub mod events;

pub use error::{ConfigError, DecodeError, RealtimeError, TransportError};
pub use events::{KpiUpdate, Measurement, Message, SpcAlert, event_types};
