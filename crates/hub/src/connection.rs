//! Observer connection management: read/write pumps, ping/pong, send
//! buffering.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use wharf_protocol::constants::{WS_MAX_MESSAGE_SIZE, WS_PING_PERIOD, WS_PONG_WAIT};
use wharf_protocol::envelope::Envelope;
use wharf_protocol::messages::SubscribePayload;
use wharf_protocol::MessageType;

use crate::hub::{ConnId, HubHandle};
use crate::SEND_BUFFER_SIZE;

/// Handle for queueing envelopes to one observer.
///
/// Cloneable and cheap, wraps an `mpsc::Sender`.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<Envelope>,
}

impl Sender {
    /// Creates a sender backed by a bounded channel, returning the
    /// receiving half for a write pump (or a test) to drain.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queues an envelope for delivery.
    ///
    /// Returns `Err` when the buffer is full or the connection has
    /// closed; the message is dropped either way.
    pub fn send(&self, envelope: Envelope) -> Result<(), SendError> {
        self.tx.try_send(envelope).map_err(|_| SendError)
    }

    /// Returns `true` if the connection is still draining messages.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Error returned when the send buffer is full or the connection closed.
#[derive(Debug, thiserror::Error)]
#[error("send failed: buffer full or connection closed")]
pub struct SendError;

/// Runs the read and write pumps for an upgraded observer socket.
///
/// Registers the connection with the hub and unregisters it when
/// either pump stops. The pumps run as background tokio tasks until
/// the peer disconnects, liveness fails, or `server_cancel` fires.
pub fn spawn_connection<S>(
    ws_stream: S,
    conn_id: ConnId,
    identity: String,
    hub: HubHandle,
    server_cancel: CancellationToken,
) where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Send
        + 'static,
{
    let (sender, rx) = Sender::channel(SEND_BUFFER_SIZE);
    let cancel = server_cancel.child_token();

    hub.register(conn_id, sender.clone());

    let (ws_sink, ws_stream) = ws_stream.split();

    tokio::spawn(write_pump(ws_sink, rx, cancel.clone()));

    let read_cancel = cancel.clone();
    tokio::spawn(async move {
        read_pump(ws_stream, conn_id, &sender, &hub, read_cancel.clone()).await;
        // When the read pump exits, stop the write pump too.
        read_cancel.cancel();
        hub.unregister(conn_id);
        tracing::info!(conn_id, identity = %identity, "observer disconnected");
    });
}

/// Write pump: drains the send channel and sends WS pings.
async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<Envelope>, cancel: CancellationToken)
where
    S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin,
{
    let mut ping_interval = tokio::time::interval(WS_PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            envelope = rx.recv() => {
                match envelope {
                    Some(envelope) => {
                        let json = match serde_json::to_string(&envelope) {
                            Ok(json) => json,
                            Err(e) => {
                                tracing::error!("failed to encode envelope: {e}");
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(WsMessage::Text(json.into())).await {
                            tracing::error!("write pump send error: {e}");
                            break;
                        }
                    }
                    None => break, // Channel closed.
                }
            }

            _ = ping_interval.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                    tracing::error!("write pump ping error: {e}");
                    break;
                }
            }
        }
    }

    // Best-effort close frame.
    let _ = sink.close().await;
}

/// Read pump: reads WS frames and turns control messages into hub
/// commands.
async fn read_pump<S>(
    mut stream: S,
    conn_id: ConnId,
    sender: &Sender,
    hub: &HubHandle,
    cancel: CancellationToken,
) where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Send
        + Unpin,
{
    let mut pong_deadline = tokio::time::interval(WS_PONG_WAIT);
    pong_deadline.reset();
    let mut alive = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            _ = pong_deadline.tick() => {
                if !alive {
                    tracing::warn!(conn_id, "pong timeout, closing connection");
                    break;
                }
                alive = false;
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(ws_msg)) => {
                        // Any inbound traffic proves the peer is alive.
                        alive = true;
                        match ws_msg {
                            WsMessage::Text(text) => {
                                if text.len() > WS_MAX_MESSAGE_SIZE {
                                    tracing::error!(conn_id, "message exceeds max size ({} > {})", text.len(), WS_MAX_MESSAGE_SIZE);
                                    continue;
                                }
                                dispatch_text(conn_id, sender, hub, &text);
                            }
                            WsMessage::Pong(_) => {
                                pong_deadline.reset();
                            }
                            // tungstenite queues the pong reply itself.
                            WsMessage::Ping(_) => {}
                            WsMessage::Close(_) => {
                                tracing::debug!(conn_id, "received close frame");
                                break;
                            }
                            // Observers have no binary protocol.
                            WsMessage::Binary(_) | WsMessage::Frame(_) => {}
                        }
                    }
                    Some(Err(e)) => {
                        tracing::error!(conn_id, "read pump error: {e}");
                        break;
                    }
                    None => break, // Stream ended.
                }
            }
        }
    }
}

/// Handles one inbound control message. A malformed message is logged
/// and answered with an `error` envelope; the connection stays open.
fn dispatch_text(conn_id: ConnId, sender: &Sender, hub: &HubHandle, text: &str) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(conn_id, "invalid message JSON: {e}");
            let _ = sender.send(Envelope::error("invalid message"));
            return;
        }
    };

    match envelope.msg_type {
        MessageType::Subscribe => match envelope.parse_payload::<SubscribePayload>() {
            Ok(Some(payload)) => hub.subscribe(conn_id, payload.job_id),
            _ => {
                tracing::warn!(conn_id, "subscribe without a job id");
                let _ = sender.send(Envelope::error("subscribe requires a jobId"));
            }
        },
        MessageType::Unsubscribe => match envelope.parse_payload::<SubscribePayload>() {
            Ok(Some(payload)) => hub.unsubscribe(conn_id, payload.job_id),
            _ => {
                tracing::warn!(conn_id, "unsubscribe without a job id");
                let _ = sender.send(Envelope::error("unsubscribe requires a jobId"));
            }
        },
        MessageType::Ping => {
            let _ = sender.send(Envelope::pong());
        }
        other => {
            tracing::warn!(conn_id, msg_type = ?other, "unexpected message type");
            let _ = sender.send(Envelope::error("unexpected message type"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_error_display() {
        assert!(SendError.to_string().contains("buffer full"));
    }

    #[test]
    fn sender_reports_full_buffer() {
        let (sender, _rx) = Sender::channel(1);
        assert!(sender.send(Envelope::pong()).is_ok());
        assert!(sender.send(Envelope::pong()).is_err());
    }

    #[test]
    fn sender_reports_closed_channel() {
        let (sender, rx) = Sender::channel(1);
        drop(rx);
        assert!(!sender.is_connected());
        assert!(sender.send(Envelope::pong()).is_err());
    }
}
