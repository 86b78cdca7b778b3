//! Observer WebSocket server.
//!
//! Listens on a TCP port, checks the identity token during the HTTP
//! upgrade, and hands accepted sockets to per-connection pumps.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_util::sync::CancellationToken;

use crate::auth::TokenValidator;
use crate::connection;
use crate::hub::{Hub, HubHandle};
use crate::HubError;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct HubServerConfig {
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
}

impl Default for HubServerConfig {
    fn default() -> Self {
        Self { port: 0 }
    }
}

/// The observer WebSocket server.
///
/// Owns the hub loop; accepted connections register with it and
/// receive job events through it.
pub struct HubServer {
    config: HubServerConfig,
    validator: Arc<dyn TokenValidator>,
    hub: HubHandle,
    cancel: CancellationToken,
    next_conn_id: AtomicU64,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl HubServer {
    /// Creates a new server. Spawns the hub loop immediately so the
    /// handle can be wired to publishers before the listener binds.
    pub fn new(config: HubServerConfig, validator: impl TokenValidator) -> Arc<Self> {
        let cancel = CancellationToken::new();
        let hub = Hub::spawn(cancel.clone());
        Arc::new(Self {
            config,
            validator: Arc::new(validator),
            hub,
            cancel,
            next_conn_id: AtomicU64::new(1),
            local_addr: Mutex::new(None),
        })
    }

    /// Returns the handle to the notification hub.
    pub fn hub(&self) -> HubHandle {
        self.hub.clone()
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Gracefully shuts down the server, the hub loop, and all
    /// connection pumps.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the server until cancellation.
    pub async fn run(self: &Arc<Self>) -> Result<(), HubError> {
        let addr: SocketAddr = ([0, 0, 0, 0], self.config.port).into();
        let listener = TcpListener::bind(addr).await?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!("hub server listening on {local_addr}");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("hub server shutting down");
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    tracing::warn!(%peer_addr, "connection refused: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }

    /// Upgrades one TCP connection, checking the token in the
    /// handshake request.
    async fn handle_connection(
        self: &Arc<Self>,
        stream: tokio::net::TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), HubError> {
        let validator = Arc::clone(&self.validator);
        let identity = Arc::new(std::sync::Mutex::new(None::<String>));
        let identity_slot = Arc::clone(&identity);

        let callback = move |req: &Request, response: Response| {
            match extract_token(req).and_then(|t| validator.validate(&t)) {
                Some(who) => {
                    if let Ok(mut slot) = identity_slot.lock() {
                        *slot = Some(who);
                    }
                    Ok(response)
                }
                None => {
                    let mut refusal = ErrorResponse::new(Some("invalid token".into()));
                    *refusal.status_mut() = StatusCode::UNAUTHORIZED;
                    Err(refusal)
                }
            }
        };

        let ws_stream = accept_hdr_async(stream, callback).await?;

        let identity = identity
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
            .ok_or(HubError::Unauthorized)?;
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        tracing::info!(conn_id, %peer_addr, identity = %identity, "observer connected");

        connection::spawn_connection(
            ws_stream,
            conn_id,
            identity,
            self.hub.clone(),
            self.cancel.clone(),
        );
        Ok(())
    }
}

/// Pulls the identity token out of the upgrade request: the
/// `Authorization: Bearer` header, or a `token` query parameter for
/// clients that cannot set headers on a socket upgrade.
fn extract_token(req: &Request) -> Option<String> {
    if let Some(value) = req.headers().get("authorization") {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }

    let query = req.uri().query()?;
    query.split('&').find_map(|pair| {
        pair.strip_prefix("token=")
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenValidator;
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
    use wharf_protocol::envelope::Envelope;
    use wharf_protocol::types::{JobState, JobUpdate};
    use wharf_protocol::MessageType;

    async fn start_server() -> (Arc<HubServer>, u16, tokio::task::JoinHandle<()>) {
        let server = HubServer::new(
            HubServerConfig::default(),
            StaticTokenValidator::new("secret", "tester"),
        );
        let server2 = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            server2.run().await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let port = server.port().await;
        assert!(port > 0);
        (server, port, handle)
    }

    async fn next_text<S>(ws: &mut S) -> Envelope
    where
        S: futures_util::Stream<
                Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>,
            > + Unpin,
    {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("timed out")
                .expect("stream ended")
                .expect("read error");
            if let WsMessage::Text(text) = frame {
                return serde_json::from_str(&text).expect("invalid envelope");
            }
        }
    }

    #[tokio::test]
    async fn rejects_missing_or_invalid_token() {
        let (server, port, handle) = start_server().await;

        let bare = format!("ws://127.0.0.1:{port}");
        assert!(connect_async(&bare).await.is_err());

        let wrong = format!("ws://127.0.0.1:{port}/?token=nope");
        assert!(connect_async(&wrong).await.is_err());

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn accepts_query_token_and_answers_ping() {
        let (server, port, handle) = start_server().await;

        let url = format!("ws://127.0.0.1:{port}/?token=secret");
        let (mut ws, _) = connect_async(&url).await.unwrap();

        let ping = serde_json::to_string(&Envelope::new::<()>(MessageType::Ping, None).unwrap())
            .unwrap();
        ws.send(WsMessage::Text(ping.into())).await.unwrap();

        let reply = next_text(&mut ws).await;
        assert_eq!(reply.msg_type, MessageType::Pong);

        drop(ws);
        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn accepts_bearer_header_token() {
        let (server, port, handle) = start_server().await;

        let mut request = format!("ws://127.0.0.1:{port}")
            .into_client_request()
            .unwrap();
        request
            .headers_mut()
            .insert("Authorization", "Bearer secret".parse().unwrap());
        let (ws, _) = connect_async(request).await.unwrap();

        drop(ws);
        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn subscribed_client_receives_published_update() {
        let (server, port, handle) = start_server().await;

        let url = format!("ws://127.0.0.1:{port}/?token=secret");
        let (mut ws, _) = connect_async(&url).await.unwrap();

        let payload = wharf_protocol::messages::SubscribePayload { job_id: "j1".into() };
        let subscribe = serde_json::to_string(
            &Envelope::new(MessageType::Subscribe, Some(&payload)).unwrap(),
        )
        .unwrap();
        ws.send(WsMessage::Text(subscribe.into())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        server.hub().publish(JobUpdate {
            job_id: "j1".into(),
            state: JobState::Running,
            progress: 42,
            error: None,
        });

        let env = next_text(&mut ws).await;
        assert_eq!(env.msg_type, MessageType::JobUpdate);
        let update: JobUpdate = env.parse_payload().unwrap().unwrap();
        assert_eq!(update.job_id, "j1");
        assert_eq!(update.progress, 42);

        drop(ws);
        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_message_gets_error_envelope_and_connection_survives() {
        let (server, port, handle) = start_server().await;

        let url = format!("ws://127.0.0.1:{port}/?token=secret");
        let (mut ws, _) = connect_async(&url).await.unwrap();

        ws.send(WsMessage::Text("{not json".into())).await.unwrap();
        let env = next_text(&mut ws).await;
        assert_eq!(env.msg_type, MessageType::Error);

        // The connection still works afterwards.
        let ping = serde_json::to_string(&Envelope::new::<()>(MessageType::Ping, None).unwrap())
            .unwrap();
        ws.send(WsMessage::Text(ping.into())).await.unwrap();
        let reply = next_text(&mut ws).await;
        assert_eq!(reply.msg_type, MessageType::Pong);

        drop(ws);
        server.shutdown();
        handle.await.unwrap();
    }

    #[test]
    fn extract_token_prefers_bearer_header() {
        let request = Request::builder()
            .uri("ws://localhost/?token=from-query")
            .header("Authorization", "Bearer from-header")
            .body(())
            .unwrap();
        assert_eq!(extract_token(&request).as_deref(), Some("from-header"));
    }

    #[test]
    fn extract_token_falls_back_to_query() {
        let request = Request::builder()
            .uri("ws://localhost/?foo=bar&token=abc")
            .body(())
            .unwrap();
        assert_eq!(extract_token(&request).as_deref(), Some("abc"));

        let none = Request::builder().uri("ws://localhost/").body(()).unwrap();
        assert!(extract_token(&none).is_none());
    }
}
