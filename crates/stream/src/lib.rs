//! Real-time event stream client.
//!
//! Keeps one WebSocket to the event endpoint alive: reconnects with
//! exponential backoff, sends heartbeat pings, replays subscriptions after
//! every reconnect, dispatches typed events to registered handlers and
//! drives cache invalidation for the data-fetching layer.

pub mod cache;
pub mod config;
pub mod heartbeat;
pub mod manager;
mod pumps;
pub(crate) mod reconnection;
pub mod router;
pub mod subscriptions;
pub mod token;
pub mod transport;
pub mod types;

pub use cache::{CacheInvalidator, CacheKey, InvalidationTable};
pub use config::{ReconnectConfig, StreamConfig};
pub use manager::ConnectionManager;
pub use router::{EventRouter, HandlerRegistration};
pub use token::{AuthEvent, SessionTokens, TokenProvider};
pub use transport::{Connector, StreamError, Transport, TransportError, TungsteniteConnector};
pub use types::{ConnectionEvent, ConnectionState};
