//! Inbound event envelope and typed payloads.
//!
//! Frames arrive as `{"type": ..., "timestamp": ..., "data": {...}}`. The
//! `data` object is kept as a `RawValue` until the `type` is known, then
//! decoded into the payload struct for that type. Any mismatch is a
//! [`ParseError`]; nothing is passed through untyped.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::value::RawValue;

use crate::constants::EventType;

/// Errors from decoding an inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown event type: {0}")]
    UnknownType(String),

    #[error("missing data for {0} event")]
    MissingData(EventType),

    #[error("invalid {event_type} payload: {source}")]
    Payload {
        event_type: EventType,
        #[source]
        source: serde_json::Error,
    },
}

/// Severity assigned to a threat by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Health of an upstream provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ThreatDetected {
    pub threat_id: String,
    pub severity: Severity,
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub source_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProviderHealthChange {
    pub provider: String,
    pub status: HealthStatus,
    #[serde(default)]
    pub previous_status: Option<HealthStatus>,
    #[serde(default)]
    pub latency_ms: Option<u64>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CostThresholdAlert {
    pub current_cost: f64,
    pub threshold: f64,
    pub period: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SystemStatusUpdate {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    /// Per-component status, keyed by component name.
    #[serde(default)]
    pub components: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConnectionEstablished {
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscriptionUpdated {
    pub event_types: Vec<EventType>,
}

/// Error reported by the server on the stream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

/// Typed event payload, one variant per [`EventType`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    ThreatDetected(ThreatDetected),
    ProviderHealthChange(ProviderHealthChange),
    CostThresholdAlert(CostThresholdAlert),
    SystemStatusUpdate(SystemStatusUpdate),
    ConnectionEstablished(ConnectionEstablished),
    SubscriptionUpdated(SubscriptionUpdated),
    Pong,
    Error(ErrorEvent),
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::ThreatDetected(_) => EventType::ThreatDetected,
            EventPayload::ProviderHealthChange(_) => EventType::ProviderHealthChange,
            EventPayload::CostThresholdAlert(_) => EventType::CostThresholdAlert,
            EventPayload::SystemStatusUpdate(_) => EventType::SystemStatusUpdate,
            EventPayload::ConnectionEstablished(_) => EventType::ConnectionEstablished,
            EventPayload::SubscriptionUpdated(_) => EventType::SubscriptionUpdated,
            EventPayload::Pong => EventType::Pong,
            EventPayload::Error(_) => EventType::Error,
        }
    }
}

/// Wire shape of an inbound frame before the payload is typed.
#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    data: Option<Box<RawValue>>,
}

/// A parsed, immutable server event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    /// Decodes a text frame into a typed event.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let raw: RawEvent = serde_json::from_str(text)?;
        let event_type = EventType::from_wire(&raw.event_type)
            .ok_or_else(|| ParseError::UnknownType(raw.event_type.clone()))?;
        let data = raw.data.as_deref();

        let payload = match event_type {
            EventType::ThreatDetected => {
                EventPayload::ThreatDetected(require_data(event_type, data)?)
            }
            EventType::ProviderHealthChange => {
                EventPayload::ProviderHealthChange(require_data(event_type, data)?)
            }
            EventType::CostThresholdAlert => {
                EventPayload::CostThresholdAlert(require_data(event_type, data)?)
            }
            EventType::SystemStatusUpdate => {
                EventPayload::SystemStatusUpdate(require_data(event_type, data)?)
            }
            EventType::ConnectionEstablished => {
                EventPayload::ConnectionEstablished(data_or_default(event_type, data)?)
            }
            EventType::SubscriptionUpdated => {
                EventPayload::SubscriptionUpdated(require_data(event_type, data)?)
            }
            EventType::Pong => EventPayload::Pong,
            EventType::Error => EventPayload::Error(require_data(event_type, data)?),
        };

        Ok(Self {
            timestamp: raw.timestamp,
            payload,
        })
    }

}

fn is_null(data: Option<&RawValue>) -> bool {
    data.is_none_or(|raw| raw.get().trim() == "null")
}

fn require_data<T: DeserializeOwned>(
    event_type: EventType,
    data: Option<&RawValue>,
) -> Result<T, ParseError> {
    if is_null(data) {
        return Err(ParseError::MissingData(event_type));
    }
    decode(event_type, data)
}

fn data_or_default<T: DeserializeOwned + Default>(
    event_type: EventType,
    data: Option<&RawValue>,
) -> Result<T, ParseError> {
    if is_null(data) {
        return Ok(T::default());
    }
    decode(event_type, data)
}

fn decode<T: DeserializeOwned>(
    event_type: EventType,
    data: Option<&RawValue>,
) -> Result<T, ParseError> {
    let raw = data.map(RawValue::get).unwrap_or("null");
    serde_json::from_str(raw).map_err(|source| ParseError::Payload { event_type, source })
}
