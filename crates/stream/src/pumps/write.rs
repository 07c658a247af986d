//! WebSocket write pump: serialises outbound frames.

use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use watchtower_protocol::constants::CLOSE_NORMAL;

use crate::transport::{Message, TransportError};

/// Writes queued frames to the transport until cancelled.
///
/// On cancellation the transport is closed with a normal closure code.
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut write_rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) where
    S: Sink<Message, Error = TransportError> + Unpin,
{
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            msg = write_rx.recv() => {
                match msg {
                    Some(m) => {
                        if let Err(e) = write.send(m).await {
                            error!("WebSocket write error: {e}");
                            return;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    debug!("closing transport");
    let _ = write.send(normal_close()).await;
}

fn normal_close() -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::from(CLOSE_NORMAL),
        reason: "".into(),
    }))
}
