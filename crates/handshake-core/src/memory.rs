//! In-process gateway transport.
//!
//! Each `connect` hands the gateway side of the connection ([`MemoryPeer`]) to
//! whoever holds the receiver returned by [`memory_gateway`]. Used by tests and
//! by embedders that run a gateway in the same process.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    channel::{Connector, FrameTransport, TransportError},
    types::{ClientFrame, GatewayFrame},
};

/// Create a connector and the stream of gateway-side peers it produces.
pub fn memory_gateway() -> (MemoryConnector, mpsc::UnboundedReceiver<MemoryPeer>) {
    let (peer_tx, peer_rx) = mpsc::unbounded_channel();
    (
        MemoryConnector {
            peers: peer_tx,
            refuse: Arc::new(AtomicBool::new(false)),
            connects: Arc::new(AtomicUsize::new(0)),
        },
        peer_rx,
    )
}

#[derive(Clone, Debug)]
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    refuse: Arc<AtomicBool>,
    connects: Arc<AtomicUsize>,
}

impl MemoryConnector {
    /// Make subsequent `connect` calls fail as if the endpoint refused them.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Number of connection attempts, refused ones included.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn FrameTransport>, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Connect(format!(
                "{endpoint}: connection refused"
            )));
        }

        let (client_tx, client_rx) = mpsc::unbounded_channel();
        let (gateway_tx, gateway_rx) = mpsc::unbounded_channel();
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicBool::new(false));

        let peer = MemoryPeer {
            from_client: client_rx,
            to_client: Some(gateway_tx),
            shutdowns: Arc::clone(&shutdowns),
            released: Arc::clone(&released),
        };
        self.peers
            .send(peer)
            .map_err(|_| TransportError::Connect(format!("{endpoint}: no gateway listening")))?;

        Ok(Box::new(MemoryTransport {
            outbound: Some(client_tx),
            inbound: gateway_rx,
            shutdowns,
            released,
        }))
    }
}

struct MemoryTransport {
    outbound: Option<mpsc::UnboundedSender<String>>,
    inbound: mpsc::UnboundedReceiver<Result<String, TransportError>>,
    shutdowns: Arc<AtomicUsize>,
    released: Arc<AtomicBool>,
}

#[async_trait]
impl FrameTransport for MemoryTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        let Some(outbound) = self.outbound.as_ref() else {
            return Err(TransportError::Io("connection shut down".to_owned()));
        };
        outbound
            .send(text)
            .map_err(|_| TransportError::Io("gateway went away".to_owned()))
    }

    async fn recv_text(&mut self) -> Option<Result<String, TransportError>> {
        self.inbound.recv().await
    }

    async fn shutdown(&mut self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.outbound = None;
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Gateway side of one in-memory connection.
pub struct MemoryPeer {
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: Option<mpsc::UnboundedSender<Result<String, TransportError>>>,
    shutdowns: Arc<AtomicUsize>,
    released: Arc<AtomicBool>,
}

impl MemoryPeer {
    /// Next raw text frame from the client; `None` once the client let go.
    pub async fn next_client_text(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Next decoded client frame; undecodable text also yields `None`.
    pub async fn next_client_frame(&mut self) -> Option<ClientFrame> {
        let text = self.next_client_text().await?;
        serde_json::from_str(&text).ok()
    }

    pub fn reply(&self, frame: GatewayFrame) {
        if let Ok(text) = serde_json::to_string(&frame) {
            self.reply_raw(text);
        }
    }

    pub fn reply_raw(&self, text: impl Into<String>) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(Ok(text.into()));
        }
    }

    /// Inject a transport failure into the client's receive path.
    pub fn fail(&self, message: impl Into<String>) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(Err(TransportError::Io(message.into())));
        }
    }

    /// Drop the gateway end so the client sees the connection close.
    pub fn hang_up(&mut self) {
        self.to_client = None;
    }

    /// Times the client ran a graceful shutdown on this connection.
    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    /// Whether the client side of the connection has been dropped.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}
