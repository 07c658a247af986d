//! Public types for the stream connection manager.

use std::time::Duration;

/// Lifecycle state of the event stream connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// No transport and no reconnect pending.
    Idle,
    /// Transport is being opened.
    Connecting,
    /// Transport is open and events are flowing.
    Open,
    /// Connection lost, a reconnect attempt is scheduled.
    Reconnecting { attempt: u32 },
    /// Reconnect attempts exhausted. Only an explicit `connect()` recovers.
    GivenUp,
}

/// Events emitted by the connection manager.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Connection state changed.
    StateChanged(ConnectionState),
    /// A reconnect attempt was scheduled.
    Reconnecting { attempt: u32, next_retry: Duration },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_state_equality() {
        assert_eq!(ConnectionState::Idle, ConnectionState::Idle);
        assert_ne!(ConnectionState::Open, ConnectionState::Connecting);
        assert_eq!(
            ConnectionState::Reconnecting { attempt: 1 },
            ConnectionState::Reconnecting { attempt: 1 },
        );
        assert_ne!(
            ConnectionState::Reconnecting { attempt: 1 },
            ConnectionState::Reconnecting { attempt: 2 },
        );
    }
}
