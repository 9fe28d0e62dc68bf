use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::types::{HandshakeCommand, HandshakeEvent};

/// Broadcast event stream type used by front-end subscribers.
pub type EventStream = broadcast::Receiver<HandshakeEvent>;

/// Errors returned by runtime channel operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeChannelError {
    /// The command receiver side is closed.
    #[error("command channel is closed")]
    CommandChannelClosed,
}

/// Publishing half of the event channel, held by the runtime task.
#[derive(Clone, Debug)]
pub struct EventEmitter {
    event_tx: broadcast::Sender<HandshakeEvent>,
}

impl EventEmitter {
    /// Emit an event to all subscribers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, event: HandshakeEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Emit several events in order.
    pub fn emit_all(&self, events: impl IntoIterator<Item = HandshakeEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}

/// Command/event channel pair used by the runtime and its front end.
///
/// The runtime keeps only the [`EventEmitter`], so dropping every clone of
/// this struct closes the command channel and tears the runtime down.
#[derive(Clone, Debug)]
pub struct RuntimeChannels {
    command_tx: mpsc::Sender<HandshakeCommand>,
    emitter: EventEmitter,
}

impl RuntimeChannels {
    /// Create a new channel set and return it with the command receiver.
    pub fn new(
        command_buffer: usize,
        event_buffer: usize,
    ) -> (Self, mpsc::Receiver<HandshakeCommand>) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));

        (
            Self {
                command_tx,
                emitter: EventEmitter { event_tx },
            },
            command_rx,
        )
    }

    /// Clone the event publisher.
    pub fn emitter(&self) -> EventEmitter {
        self.emitter.clone()
    }

    /// Subscribe to emitted handshake events.
    pub fn subscribe(&self) -> EventStream {
        self.emitter.event_tx.subscribe()
    }

    /// Send one command to the runtime.
    pub async fn send_command(
        &self,
        command: HandshakeCommand,
    ) -> Result<(), RuntimeChannelError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| RuntimeChannelError::CommandChannelClosed)
    }
}
