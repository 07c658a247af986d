//! WebSocket read pump: hands inbound frames to the router.

use std::fmt;

use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::router::EventRouter;
use crate::transport::{Message, TransportError};

/// Why the read loop ended.
#[derive(Debug)]
pub(crate) enum ReadOutcome {
    /// The link was cancelled by the manager. Close handling is detached,
    /// so nothing must be reported.
    Detached,
    /// The transport went away on its own.
    Closed(CloseReason),
}

#[derive(Debug)]
pub(crate) enum CloseReason {
    /// The server sent a close frame.
    Remote { code: Option<u16>, reason: String },
    /// The transport reported an error.
    Error(TransportError),
    /// The stream ended without a close frame.
    Ended,
    /// The transport could not be opened at all.
    OpenFailed(TransportError),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Remote {
                code: Some(code),
                reason,
            } => write!(f, "closed by server ({code}) {reason}"),
            CloseReason::Remote { code: None, .. } => f.write_str("closed by server"),
            CloseReason::Error(e) => write!(f, "transport error: {e}"),
            CloseReason::Ended => f.write_str("stream ended"),
            CloseReason::OpenFailed(e) => write!(f, "connect failed: {e}"),
        }
    }
}

/// Reads frames in delivery order and dispatches them through the router.
pub(crate) async fn read_pump<S>(
    mut read: S,
    router: &EventRouter,
    max_message_size: usize,
    cancel: &CancellationToken,
) -> ReadOutcome
where
    S: Stream<Item = Result<Message, TransportError>> + Unpin,
{
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return ReadOutcome::Detached,
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_text_message(text.as_str(), router, max_message_size);
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!("received close frame");
                        let reason = match frame {
                            Some(f) => CloseReason::Remote {
                                code: Some(u16::from(f.code)),
                                reason: f.reason.as_str().to_owned(),
                            },
                            None => CloseReason::Remote { code: None, reason: String::new() },
                        };
                        return ReadOutcome::Closed(reason);
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        // Transport-level keepalive, answered by the WebSocket layer.
                        trace!("transport ping/pong");
                    }
                    Some(Ok(_)) => {} // Binary and raw frames are ignored.
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        return ReadOutcome::Closed(CloseReason::Error(e));
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        return ReadOutcome::Closed(CloseReason::Ended);
                    }
                }
            }
        }
    }
}

fn handle_text_message(text: &str, router: &EventRouter, max_message_size: usize) {
    if text.len() > max_message_size {
        warn!("message too large ({} bytes), dropping", text.len());
        return;
    }
    router.dispatch_text(text);
}
