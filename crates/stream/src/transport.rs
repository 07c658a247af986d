//! WebSocket transport abstraction.
//!
//! The manager never touches `tokio-tungstenite` directly: it asks a
//! [`Connector`] for a [`Transport`] (a frame sink plus a frame stream) so
//! the lifecycle logic can run against any full-duplex frame channel.

use std::pin::Pin;

use futures_util::future::BoxFuture;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite;
use url::Url;

pub use tokio_tungstenite::tungstenite::Message;

/// Errors from opening or using a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("connection refused: {0}")]
    Refused(String),
}

/// Errors from writing a control frame.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("not connected")]
    NotConnected,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("outbound queue full")]
    QueueFull,
}

/// Outbound half of a transport.
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = TransportError> + Send>>;

/// Inbound half of a transport.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Message, TransportError>> + Send>>;

/// An open full-duplex frame channel.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens transports to the event endpoint.
pub trait Connector: Send + Sync {
    fn open(&self, url: Url) -> BoxFuture<'static, Result<Transport, TransportError>>;
}

/// Production connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    max_message_size: usize,
}

impl TungsteniteConnector {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }
}

impl Connector for TungsteniteConnector {
    fn open(&self, url: Url) -> BoxFuture<'static, Result<Transport, TransportError>> {
        let max_message_size = self.max_message_size;
        Box::pin(async move {
            let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
            ws_config.max_message_size = Some(max_message_size);
            ws_config.max_frame_size = Some(max_message_size);
            let (ws_stream, _) =
                tokio_tungstenite::connect_async_with_config(url.as_str(), Some(ws_config), false)
                    .await?;
            let (write, read) = ws_stream.split();

            Ok(Transport {
                sink: Box::pin(write.sink_map_err(TransportError::from)),
                stream: Box::pin(read.map(|msg| msg.map_err(TransportError::from))),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(
            TransportError::Refused("503".into()).to_string(),
            "connection refused: 503"
        );
        assert_eq!(StreamError::NotConnected.to_string(), "not connected");
        assert_eq!(StreamError::QueueFull.to_string(), "outbound queue full");
    }

    #[tokio::test]
    async fn tungstenite_connector_reports_unreachable_host() {
        // Port 9 (discard) on localhost is essentially never a WebSocket server.
        let connector = TungsteniteConnector::new(1024);
        let url = Url::parse("ws://127.0.0.1:9/ws/events").unwrap();
        let result = connector.open(url).await;
        assert!(matches!(result, Err(TransportError::Ws(_))));
    }
}
