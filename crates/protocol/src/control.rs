//! Outbound control frames written by the client.

use serde::{Deserialize, Serialize};

use crate::constants::EventType;

/// Control frame sent from the client to the server.
///
/// The server treats `subscribe` as replace-on-receipt: every subscribe
/// frame must carry the complete set of wanted event types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlFrame {
    Subscribe { event_types: Vec<EventType> },
    Ping,
}

impl ControlFrame {
    /// Builds a subscribe frame for the given set of event types.
    pub fn subscribe(event_types: impl IntoIterator<Item = EventType>) -> Self {
        ControlFrame::Subscribe {
            event_types: event_types.into_iter().collect(),
        }
    }

    /// Serializes the frame to its JSON text form.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
