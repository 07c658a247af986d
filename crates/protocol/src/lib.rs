pub mod constants;
pub mod control;
pub mod events;

// Re-export primary types for convenience.
pub use constants::EventType;
pub use control::ControlFrame;
pub use events::{
    ConnectionEstablished, CostThresholdAlert, ErrorEvent, Event, EventPayload, HealthStatus,
    ParseError, ProviderHealthChange, Severity, SubscriptionUpdated, SystemStatusUpdate,
    ThreatDetected,
};
