use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use handshake_core::{Connector, FrameTransport, HandshakeError, TransportError};
use tokio::{net::TcpStream, time::timeout};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};
use tracing::debug;
use url::Url;

/// Path of the session generation socket on the provisioning gateway.
pub const SESSION_SOCKET_PATH: &str = "/api/ws/generate_session";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type GatewaySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Derive the handshake endpoint from a gateway base URL.
///
/// `http` maps to `ws` and `https` to `wss`; websocket schemes pass through.
/// Bare hosts are treated as `https`, except loopback hosts which use `http`.
/// Any path, query or fragment on the base is replaced.
pub fn session_socket_url(base: &str) -> Result<String, HandshakeError> {
    let trimmed = base.trim();
    if trimmed.is_empty() {
        return Err(HandshakeError::validation_missing("gateway url"));
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_owned()
    } else if is_loopback_host(trimmed) {
        format!("http://{trimmed}")
    } else {
        format!("https://{trimmed}")
    };

    let mut url = Url::parse(&candidate)
        .map_err(|err| HandshakeError::invalid_field("gateway url", err.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(HandshakeError::invalid_field(
                "gateway url",
                format!("unsupported scheme '{other}'"),
            ));
        }
    };
    if url.host_str().is_none() {
        return Err(HandshakeError::invalid_field("gateway url", "missing host"));
    }
    url.set_scheme(scheme)
        .map_err(|_| HandshakeError::invalid_field("gateway url", "cannot switch scheme"))?;
    url.set_path(SESSION_SOCKET_PATH);
    url.set_query(None);
    url.set_fragment(None);

    Ok(url.to_string())
}

fn is_loopback_host(raw: &str) -> bool {
    let host = raw.split([':', '/']).next().unwrap_or_default();
    matches!(host, "localhost" | "127.0.0.1")
}

/// Opens handshake channels over `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn FrameTransport>, TransportError> {
        let (socket, response) = timeout(self.connect_timeout, connect_async(endpoint))
            .await
            .map_err(|_| {
                TransportError::Connect(format!(
                    "{endpoint}: no answer within {} ms",
                    self.connect_timeout.as_millis()
                ))
            })?
            .map_err(|err| TransportError::Connect(format!("{endpoint}: {err}")))?;

        debug!(%endpoint, status = %response.status(), "websocket connected");
        Ok(Box::new(WebSocketTransport { socket }))
    }
}

/// One text-framed websocket connection to the gateway.
pub struct WebSocketTransport {
    socket: GatewaySocket,
}

#[async_trait]
impl FrameTransport for WebSocketTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.socket
            .send(Message::Text(text))
            .await
            .map_err(|err| TransportError::Io(format!("websocket send failed: {err}")))
    }

    async fn recv_text(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            let message = match self.socket.next().await? {
                Ok(message) => message,
                Err(err) => {
                    return Some(Err(TransportError::Io(format!(
                        "websocket receive failed: {err}"
                    ))));
                }
            };

            match message {
                Message::Text(text) => return Some(Ok(text)),
                Message::Binary(bytes) => {
                    return Some(String::from_utf8(bytes).map_err(|err| {
                        TransportError::Unsupported(format!("binary frame is not UTF-8: {err}"))
                    }));
                }
                Message::Close(frame) => {
                    debug!(?frame, "gateway closed the websocket");
                    return None;
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }

    async fn shutdown(&mut self) {
        if let Err(err) = self.socket.close(None).await {
            debug!(error = %err, "websocket close handshake did not complete");
        }
    }
}
