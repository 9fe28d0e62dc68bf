//! Session provisioning handshake shared between runtime and front-end consumers.
//!
//! This crate defines the wire frames, the handshake state machine, the owned
//! channel wrapper, per-attempt sessions, flow control (retry/cancel), the
//! completion notifier and the runtime command/event channels.

/// Owned full-duplex handshake channel and transport seams.
pub mod channel;
/// Credential form presence validation.
pub mod collector;
/// Stable handshake error types.
pub mod error;
/// Flow controller owning credentials and the current attempt.
pub mod flow;
/// In-process gateway transport.
pub mod memory;
/// Gateway frame classification.
pub mod normalization;
/// Post-success completion hook.
pub mod notifier;
/// Async command/event channel primitives.
pub mod runtime_channels;
/// One handshake attempt: machine plus channel.
pub mod session;
/// Handshake protocol state machine.
pub mod state_machine;
/// Wire frames, commands, events and configuration.
pub mod types;

pub use channel::{Connector, FrameTransport, HandshakeChannel, TransportError};
pub use collector::collect;
pub use error::{CONNECTIVITY_MESSAGE, HandshakeError, HandshakeErrorCategory};
pub use flow::AuthFlow;
pub use normalization::{GatewaySignal, classify_prompt_text, normalize_gateway_frame};
pub use notifier::{CompletionHook, CompletionNotifier};
pub use runtime_channels::{EventEmitter, EventStream, RuntimeChannelError, RuntimeChannels};
pub use session::HandshakeSession;
pub use state_machine::HandshakeStateMachine;
pub use types::{
    AuthRequest, ChallengeKind, ChallengeResponseFrame, ClientFrame, CompletedSession,
    CredentialForm, FlowOutcome, GatewayFrame, GatewayStatus, HandshakeCommand, HandshakeConfig,
    HandshakeEvent, HandshakeState, StartFrame,
};
