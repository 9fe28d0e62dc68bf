//! Gateway side of the session provisioning handshake.
//!
//! [`websocket`] supplies the production [`Connector`] and [`spawn_runtime`]
//! drives an [`AuthFlow`] on its own task behind command/event channels.

pub mod websocket;

use std::sync::Arc;

use handshake_core::{
    AuthFlow, CompletedSession, CompletionNotifier, Connector, EventEmitter, EventStream,
    FlowOutcome, GatewayFrame, HandshakeCommand, HandshakeConfig, HandshakeError,
    HandshakeEvent, HandshakeState, RuntimeChannelError, RuntimeChannels,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use websocket::{SESSION_SOCKET_PATH, WebSocketConnector, session_socket_url};

const COMMAND_BUFFER: usize = 16;
const EVENT_BUFFER: usize = 64;

/// Front-end handle to a running handshake task.
///
/// The task ends after `Finished`, after [`shutdown`](Self::shutdown), or once
/// every clone of the handle is dropped. Each of those releases the channel.
#[derive(Clone, Debug)]
pub struct HandshakeRuntimeHandle {
    channels: RuntimeChannels,
    shutdown: CancellationToken,
}

impl HandshakeRuntimeHandle {
    pub async fn send(&self, command: HandshakeCommand) -> Result<(), RuntimeChannelError> {
        self.channels.send_command(command).await
    }

    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }

    /// Stop the task without emitting `Finished`.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Spawn a handshake task on the current tokio runtime.
///
/// `on_complete` runs once, `config.completion_grace` after the gateway
/// reports success and before `Finished { Completed }` is emitted.
pub fn spawn_runtime(
    config: HandshakeConfig,
    connector: Arc<dyn Connector>,
    on_complete: impl FnOnce(CompletedSession) + Send + 'static,
) -> HandshakeRuntimeHandle {
    let (channels, command_rx) = RuntimeChannels::new(COMMAND_BUFFER, EVENT_BUFFER);
    let shutdown = CancellationToken::new();
    let runtime = HandshakeRuntime {
        notifier: CompletionNotifier::new(config.completion_grace, on_complete),
        flow: AuthFlow::new(config, connector),
        command_rx,
        events: channels.emitter(),
        shutdown: shutdown.clone(),
    };
    tokio::spawn(async move {
        runtime.run().await;
    });

    HandshakeRuntimeHandle { channels, shutdown }
}

enum Step {
    Command(Option<HandshakeCommand>),
    Inbound(Result<GatewayFrame, HandshakeError>),
    Shutdown,
}

/// How the grace pause after success ended.
enum GraceEnd {
    HookRan,
    Cancelled,
    /// Shutdown or every handle dropped; nobody is left to notify.
    Abandoned,
}

struct HandshakeRuntime {
    flow: AuthFlow,
    notifier: CompletionNotifier,
    command_rx: mpsc::Receiver<HandshakeCommand>,
    events: EventEmitter,
    shutdown: CancellationToken,
}

impl HandshakeRuntime {
    async fn run(mut self) {
        debug!(endpoint = %self.flow.config().endpoint, "handshake runtime started");

        loop {
            let step = if self.flow.is_listening() {
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => Step::Shutdown,
                    received = self.flow.recv_inbound() => Step::Inbound(received),
                    command = self.command_rx.recv() => Step::Command(command),
                }
            } else {
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => Step::Shutdown,
                    command = self.command_rx.recv() => Step::Command(command),
                }
            };

            let events = match step {
                Step::Command(Some(command)) => self.handle_command(command).await,
                Step::Inbound(received) => self.flow.apply_inbound(received).await,
                Step::Command(None) => {
                    info!("all runtime handles dropped; releasing handshake");
                    self.flow.cancel();
                    break;
                }
                Step::Shutdown => {
                    info!("handshake runtime shut down");
                    self.flow.cancel();
                    break;
                }
            };

            if self.publish(events).await {
                break;
            }
        }

        debug!("handshake runtime stopped");
    }

    async fn handle_command(&mut self, command: HandshakeCommand) -> Vec<HandshakeEvent> {
        debug!(command = command_kind(&command), "handling handshake command");
        let result = match command {
            HandshakeCommand::Submit(form) => self.flow.submit(form).await,
            HandshakeCommand::Respond { value } => self.flow.respond(&value).await,
            HandshakeCommand::Retry => self.flow.retry().await,
            HandshakeCommand::Cancel => Ok(self.flow.cancel()),
        };

        match result {
            Ok(events) => events,
            Err(error) => {
                warn!(code = %error.code, error = %error, "handshake command rejected");
                vec![HandshakeEvent::Rejected { error }]
            }
        }
    }

    /// Emit `events` and run completion if they contain one.
    ///
    /// Returns `true` once `Finished` has been emitted.
    async fn publish(&mut self, events: Vec<HandshakeEvent>) -> bool {
        let mut completed = None;
        let mut finished = false;
        for event in &events {
            match event {
                HandshakeEvent::Completed { message } => completed = Some(message.clone()),
                HandshakeEvent::Finished { .. } => finished = true,
                _ => {}
            }
        }
        self.events.emit_all(events);

        let Some(message) = completed else {
            return finished;
        };
        let Some(session) = self.flow.completed_session(message) else {
            warn!("completion reported without credentials; hook skipped");
            self.events.emit(HandshakeEvent::Finished {
                outcome: FlowOutcome::Completed,
            });
            return true;
        };

        match self.run_completion(session).await {
            GraceEnd::HookRan => self.events.emit(HandshakeEvent::Finished {
                outcome: FlowOutcome::Completed,
            }),
            GraceEnd::Cancelled => {
                info!("handshake cancelled during completion grace");
                let events = self.flow.cancel();
                self.events.emit_all(events);
            }
            GraceEnd::Abandoned => info!("completion abandoned; hook skipped"),
        }
        true
    }

    /// Run the notifier while still honouring shutdown and cancel.
    ///
    /// Other commands are rejected since the attempt is already `Done`.
    async fn run_completion(&mut self, session: CompletedSession) -> GraceEnd {
        let completion = self.notifier.complete(session);
        tokio::pin!(completion);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return GraceEnd::Abandoned,
                _ = &mut completion => return GraceEnd::HookRan,
                command = self.command_rx.recv() => match command {
                    None => return GraceEnd::Abandoned,
                    Some(HandshakeCommand::Cancel) => return GraceEnd::Cancelled,
                    Some(other) => {
                        let error =
                            HandshakeError::invalid_state(HandshakeState::Done, command_kind(&other));
                        warn!(code = %error.code, "command rejected during completion grace");
                        self.events.emit(HandshakeEvent::Rejected { error });
                    }
                },
            }
        }
    }
}

fn command_kind(command: &HandshakeCommand) -> &'static str {
    match command {
        HandshakeCommand::Submit(_) => "submit",
        HandshakeCommand::Respond { .. } => "respond",
        HandshakeCommand::Retry => "retry",
        HandshakeCommand::Cancel => "cancel",
    }
}
