//! Inbound event model
//!
//! Every frame pushed by the server is a JSON object carrying a `type`
//! discriminator. Known types decode into typed variants of [`Message`] so
//! handlers can read payload fields without ad hoc lookups. Anything else,
//! including a known type whose payload does not have the expected shape,
//! lands in [`Message::Unknown`] with the payload kept verbatim.
//!
//! # Wire examples
//!
//! ```json
//! {"type": "spc_alert", "data": {"id": 17, "product_id": "P-100", "rule": "western_electric_1"}}
//! {"type": "kpi_update", "data": {"kpi": "first_pass_yield", "value": 0.982}}
//! {"type": "measurement", "data": {"product_id": "P-100", "value": 12.04}}
//! {"type": "alerts", "data": [{"id": 17}, {"id": 18}]}
//! {"type": "subscribed", "product_id": "P-100"}
//! ```

use super::error::DecodeError;
use chrono::{DateTime, Utc};
use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event type keys used on the wire
pub mod event_types {
    /// Matches every inbound message regardless of its type
    pub const WILDCARD: &str = "*";
    pub const SPC_ALERT: &str = "spc_alert";
    pub const KPI_UPDATE: &str = "kpi_update";
    pub const MEASUREMENT: &str = "measurement";
    /// Reply to `get_alerts`
    pub const ALERTS: &str = "alerts";
    /// Reply to `get_latest_data`
    pub const LATEST_DATA: &str = "latest_data";
    pub const SUBSCRIBED: &str = "subscribed";
    pub const UNSUBSCRIBED: &str = "unsubscribed";
    pub const ERROR: &str = "error";
}

/// A statistical process control alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpcAlert {
    pub id: i64,

    #[serde(default, deserialize_with = "lenient_id")]
    pub product_id: Option<String>,

    /// Control characteristic the alert was raised on (e.g. "diameter")
    pub characteristic: Option<String>,

    /// Name of the violated control rule
    pub rule: Option<String>,

    pub severity: Option<String>,
    pub message: Option<String>,
    pub value: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,

    /// Fields this client does not model
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A key performance indicator refresh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiUpdate {
    /// KPI identifier (e.g. "first_pass_yield", "cpk")
    pub kpi: Option<String>,
    pub value: Option<f64>,
    pub target: Option<f64>,
    pub unit: Option<String>,

    #[serde(default, deserialize_with = "lenient_id")]
    pub product_id: Option<String>,

    pub timestamp: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single measured value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub id: Option<i64>,

    #[serde(default, deserialize_with = "lenient_id")]
    pub product_id: Option<String>,

    pub characteristic: Option<String>,
    pub value: f64,
    pub unit: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A decoded inbound message
///
/// Immutable once decoded; the router hands the same value by reference to
/// every matching handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    SpcAlert(SpcAlert),
    KpiUpdate(KpiUpdate),
    Measurement(Measurement),
    /// Batch of alerts, sent in reply to `get_alerts`
    Alerts(Vec<SpcAlert>),
    /// Batch of measurements, sent in reply to `get_latest_data`
    LatestData(Vec<Measurement>),
    Subscribed { product_id: Option<String> },
    Unsubscribed { product_id: Option<String> },
    /// An error reported by the server
    Error { message: String },
    /// Any other event, or a known event whose payload did not decode
    Unknown {
        event_type: String,
        payload: Map<String, Value>,
    },
}

impl Message {
    /// Decode a single text frame
    pub fn from_frame(raw: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(raw)?;
        let Value::Object(mut payload) = value else {
            return Err(DecodeError::NotAnObject);
        };

        let event_type = match payload.remove("type") {
            Some(Value::String(event_type)) => event_type,
            _ => return Err(DecodeError::MissingType),
        };

        Ok(Self::from_parts(event_type, payload))
    }

    /// Build a message from its discriminator and the remaining fields
    pub fn from_parts(event_type: String, payload: Map<String, Value>) -> Self {
        let typed = match event_type.as_str() {
            event_types::SPC_ALERT => data_field(&payload).map(Message::SpcAlert),
            event_types::KPI_UPDATE => data_field(&payload).map(Message::KpiUpdate),
            event_types::MEASUREMENT => data_field(&payload).map(Message::Measurement),
            event_types::ALERTS => data_field(&payload).map(Message::Alerts),
            event_types::LATEST_DATA => data_field(&payload).map(Message::LatestData),
            event_types::SUBSCRIBED => Some(Message::Subscribed {
                product_id: payload.get("product_id").and_then(id_from_value),
            }),
            event_types::UNSUBSCRIBED => Some(Message::Unsubscribed {
                product_id: payload.get("product_id").and_then(id_from_value),
            }),
            event_types::ERROR => payload
                .get("message")
                .and_then(Value::as_str)
                .map(|message| Message::Error {
                    message: message.to_string(),
                }),
            _ => None,
        };

        typed.unwrap_or_else(|| {
            if is_known(&event_type) {
                tracing::debug!(
                    event_type = %event_type,
                    "Payload did not match the expected shape, keeping it untyped"
                );
            }
            Message::Unknown {
                event_type,
                payload,
            }
        })
    }

    /// The wire `type` of this message
    pub fn event_type(&self) -> &str {
        match self {
            Message::SpcAlert(_) => event_types::SPC_ALERT,
            Message::KpiUpdate(_) => event_types::KPI_UPDATE,
            Message::Measurement(_) => event_types::MEASUREMENT,
            Message::Alerts(_) => event_types::ALERTS,
            Message::LatestData(_) => event_types::LATEST_DATA,
            Message::Subscribed { .. } => event_types::SUBSCRIBED,
            Message::Unsubscribed { .. } => event_types::UNSUBSCRIBED,
            Message::Error { .. } => event_types::ERROR,
            Message::Unknown { event_type, .. } => event_type,
        }
    }

    /// Product this message relates to, when it names one
    pub fn product_id(&self) -> Option<&str> {
        match self {
            Message::SpcAlert(alert) => alert.product_id.as_deref(),
            Message::KpiUpdate(kpi) => kpi.product_id.as_deref(),
            Message::Measurement(m) => m.product_id.as_deref(),
            Message::Subscribed { product_id } | Message::Unsubscribed { product_id } => {
                product_id.as_deref()
            }
            _ => None,
        }
    }
}

fn is_known(event_type: &str) -> bool {
    matches!(
        event_type,
        event_types::SPC_ALERT
            | event_types::KPI_UPDATE
            | event_types::MEASUREMENT
            | event_types::ALERTS
            | event_types::LATEST_DATA
            | event_types::SUBSCRIBED
            | event_types::UNSUBSCRIBED
            | event_types::ERROR
    )
}

fn data_field<T: DeserializeOwned>(payload: &Map<String, Value>) -> Option<T> {
    let data = payload.get("data")?;
    serde_json::from_value(data.clone()).ok()
}

fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Product ids arrive as strings from some endpoints and integers from others
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(id_from_value))
}
