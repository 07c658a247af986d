use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Path of the event stream endpoint, appended to the configured base URL.
pub const STREAM_PATH: &str = "/ws/events";

/// Query parameter carrying the session credential.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// How often the client sends an application-level `ping` frame.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Maximum inbound message size in bytes (1 MiB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// WebSocket close code for a deliberate, normal shutdown.
pub const CLOSE_NORMAL: u16 = 1000;

/// Event type identifier carried in the `type` field of inbound frames.
///
/// Also used in outbound subscribe frames to name the types the client
/// wants delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    // Security and operations events
    #[serde(rename = "threat_detected")]
    ThreatDetected,
    #[serde(rename = "provider_health_change")]
    ProviderHealthChange,
    #[serde(rename = "cost_threshold_alert")]
    CostThresholdAlert,
    #[serde(rename = "system_status_update")]
    SystemStatusUpdate,

    // Stream control events
    #[serde(rename = "connection_established")]
    ConnectionEstablished,
    #[serde(rename = "subscription_updated")]
    SubscriptionUpdated,
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "error")]
    Error,
}

impl EventType {
    /// Every known event type, in declaration order.
    pub const ALL: [EventType; 8] = [
        EventType::ThreatDetected,
        EventType::ProviderHealthChange,
        EventType::CostThresholdAlert,
        EventType::SystemStatusUpdate,
        EventType::ConnectionEstablished,
        EventType::SubscriptionUpdated,
        EventType::Pong,
        EventType::Error,
    ];

    /// Returns the wire name of this event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ThreatDetected => "threat_detected",
            EventType::ProviderHealthChange => "provider_health_change",
            EventType::CostThresholdAlert => "cost_threshold_alert",
            EventType::SystemStatusUpdate => "system_status_update",
            EventType::ConnectionEstablished => "connection_established",
            EventType::SubscriptionUpdated => "subscription_updated",
            EventType::Pong => "pong",
            EventType::Error => "error",
        }
    }

    /// Parses a wire name. Returns `None` for unrecognized names.
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_serialization() {
        assert_eq!(
            serde_json::to_string(&EventType::ThreatDetected).unwrap(),
            "\"threat_detected\""
        );
        assert_eq!(
            serde_json::to_string(&EventType::ProviderHealthChange).unwrap(),
            "\"provider_health_change\""
        );
        assert_eq!(serde_json::to_string(&EventType::Pong).unwrap(), "\"pong\"");
    }

    #[test]
    fn event_type_deserialization() {
        let et: EventType = serde_json::from_str("\"cost_threshold_alert\"").unwrap();
        assert_eq!(et, EventType::CostThresholdAlert);
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let result = serde_json::from_str::<EventType>("\"some_future_type\"");
        assert!(result.is_err());
        assert_eq!(EventType::from_wire("some_future_type"), None);
    }

    #[test]
    fn as_str_matches_serde_name() {
        for et in EventType::ALL {
            let json = serde_json::to_string(&et).unwrap();
            assert_eq!(json, format!("\"{}\"", et.as_str()));
            assert_eq!(EventType::from_wire(et.as_str()), Some(et));
        }
    }
}
