use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    error::HandshakeError,
    types::{ClientFrame, GatewayFrame},
};

/// Errors returned by frame transports.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Endpoint unreachable or connection refused.
    #[error("connect failed: {0}")]
    Connect(String),
    /// Send or receive failed on an open connection.
    #[error("transport failure: {0}")]
    Io(String),
    /// Peer sent a frame the transport cannot carry (for example non-UTF-8 binary).
    #[error("unsupported frame: {0}")]
    Unsupported(String),
}

impl From<TransportError> for HandshakeError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Connect(_) => HandshakeError::channel("connect_failed", err.to_string()),
            TransportError::Io(_) => HandshakeError::channel("transport_error", err.to_string()),
            TransportError::Unsupported(_) => {
                HandshakeError::protocol("malformed_frame", err.to_string())
            }
        }
    }
}

/// One message-framed, full-duplex connection.
#[async_trait]
pub trait FrameTransport: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Next inbound text frame; `None` once the peer has hung up.
    async fn recv_text(&mut self) -> Option<Result<String, TransportError>>;

    /// Release the connection. Errors are swallowed; the connection is gone either way.
    async fn shutdown(&mut self);
}

/// Opens transports to a gateway endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn FrameTransport>, TransportError>;
}

/// Owned handshake connection with idempotent release.
///
/// There is no reconnect: once closed, every `send`/`recv` fails with
/// `channel_closed` and the owning attempt must be started over.
pub struct HandshakeChannel {
    endpoint: String,
    transport: Option<Box<dyn FrameTransport>>,
}

impl HandshakeChannel {
    /// Establish the connection.
    pub async fn open(connector: &dyn Connector, endpoint: &str) -> Result<Self, HandshakeError> {
        debug!(%endpoint, "opening handshake channel");
        let transport = connector.connect(endpoint).await.map_err(|err| {
            warn!(%endpoint, error = %err, "handshake channel open failed");
            HandshakeError::from(err)
        })?;

        Ok(Self {
            endpoint: endpoint.to_owned(),
            transport: Some(transport),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Send one frame. Never queued: a closed channel is an error.
    pub async fn send(&mut self, frame: &ClientFrame) -> Result<(), HandshakeError> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(closed_error());
        };
        let text = serde_json::to_string(frame).map_err(|err| {
            HandshakeError::protocol("encode_failed", format!("failed encoding frame: {err}"))
        })?;
        debug!(frame = frame.kind(), "sending handshake frame");
        transport.send_text(text).await.map_err(HandshakeError::from)
    }

    /// Next inbound gateway frame, in arrival order.
    pub async fn recv(&mut self) -> Result<GatewayFrame, HandshakeError> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(closed_error());
        };
        match transport.recv_text().await {
            Some(Ok(text)) => serde_json::from_str::<GatewayFrame>(&text).map_err(|err| {
                HandshakeError::protocol(
                    "malformed_frame",
                    format!("failed decoding gateway frame: {err}"),
                )
            }),
            Some(Err(err)) => Err(err.into()),
            None => Err(HandshakeError::channel(
                "connection_closed",
                "gateway closed the connection",
            )),
        }
    }

    /// Shut the connection down. Returns `true` only for the call that released it.
    pub async fn close(&mut self) -> bool {
        let Some(mut transport) = self.transport.take() else {
            return false;
        };
        transport.shutdown().await;
        debug!(endpoint = %self.endpoint, "handshake channel closed");
        true
    }

    /// Synchronous release for cancellation and teardown paths.
    ///
    /// Drops the connection without a closing handshake.
    pub fn release(&mut self) -> bool {
        if self.transport.take().is_some() {
            debug!(endpoint = %self.endpoint, "handshake channel released");
            true
        } else {
            false
        }
    }
}

impl Drop for HandshakeChannel {
    fn drop(&mut self) {
        self.release();
    }
}

fn closed_error() -> HandshakeError {
    HandshakeError::channel("channel_closed", "handshake channel is not open")
}
