use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::HandshakeError;

const DEFAULT_ENDPOINT: &str = "ws://localhost:8000/api/ws/generate_session";
const DEFAULT_PROMPT_TIMEOUT_MS: u64 = 120_000;
const DEFAULT_COMPLETION_GRACE_MS: u64 = 2_000;

/// Handshake lifecycle state reported to the front end.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum HandshakeState {
    /// No attempt is running, or an attempt was submitted and the first gateway
    /// event has not arrived yet.
    #[default]
    Idle,
    /// Gateway asked for the one-time code.
    AwaitingCode,
    /// Gateway asked for the second-factor password.
    AwaitingPassword,
    /// Gateway issued the session credential.
    Done,
    /// Attempt ended with a channel, gateway or timeout failure.
    Failed,
}

impl HandshakeState {
    /// `Done` and `Failed` accept no further traffic.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// A challenge is pending and waiting for user input.
    pub fn is_awaiting_input(self) -> bool {
        matches!(self, Self::AwaitingCode | Self::AwaitingPassword)
    }
}

/// Kind of challenge issued by the gateway.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeKind {
    /// One-time code delivered out of band.
    Code,
    /// Second-factor account password.
    Password,
}

impl ChallengeKind {
    /// State the machine waits in while this challenge is pending.
    pub fn awaiting_state(self) -> HandshakeState {
        match self {
            Self::Code => HandshakeState::AwaitingCode,
            Self::Password => HandshakeState::AwaitingPassword,
        }
    }
}

/// Validated credentials for one handshake attempt.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthRequest {
    /// Numeric application id issued by the messaging platform.
    pub application_id: i64,
    /// Application secret (`api_hash` on the wire).
    pub application_secret: String,
    /// Phone number in international format.
    pub phone_number: String,
}

impl fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthRequest")
            .field("application_id", &self.application_id)
            .field("application_secret", &"<redacted>")
            .field("phone_number", &self.phone_number)
            .finish()
    }
}

/// Raw credential fields as entered by the user.
///
/// Kept by the flow across retries so a failed attempt can be resubmitted
/// without re-entering anything.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialForm {
    pub application_id: String,
    pub application_secret: String,
    pub phone_number: String,
}

impl CredentialForm {
    pub fn new(
        application_id: impl Into<String>,
        application_secret: impl Into<String>,
        phone_number: impl Into<String>,
    ) -> Self {
        Self {
            application_id: application_id.into(),
            application_secret: application_secret.into(),
            phone_number: phone_number.into(),
        }
    }
}

impl fmt::Debug for CredentialForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialForm")
            .field("application_id", &self.application_id)
            .field("application_secret", &"<redacted>")
            .field("phone_number", &self.phone_number)
            .finish()
    }
}

/// `start` frame opening a handshake.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename = "start")]
pub struct StartFrame {
    pub api_id: i64,
    pub api_hash: String,
    pub phone_number: String,
}

impl fmt::Debug for StartFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartFrame")
            .field("api_id", &self.api_id)
            .field("api_hash", &"<redacted>")
            .field("phone_number", &self.phone_number)
            .finish()
    }
}

/// Challenge answer frame (`{"value": ...}`).
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChallengeResponseFrame {
    pub value: String,
}

impl fmt::Debug for ChallengeResponseFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChallengeResponseFrame")
            .field("value", &"<redacted>")
            .finish()
    }
}

/// Frame sent from the client to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ClientFrame {
    Start(StartFrame),
    Response(ChallengeResponseFrame),
}

impl ClientFrame {
    pub fn start(request: &AuthRequest) -> Self {
        Self::Start(StartFrame {
            api_id: request.application_id,
            api_hash: request.application_secret.clone(),
            phone_number: request.phone_number.clone(),
        })
    }

    pub fn response(value: impl Into<String>) -> Self {
        Self::Response(ChallengeResponseFrame {
            value: value.into(),
        })
    }

    /// Short label used in logs instead of the frame body.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::Response(_) => "response",
        }
    }
}

/// Gateway frame status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GatewayStatus {
    Prompt,
    Success,
    Error,
}

/// Frame sent from the gateway to the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayFrame {
    pub status: GatewayStatus,
    /// Human-readable text, shown to the user verbatim.
    #[serde(default)]
    pub message: String,
    /// Structured challenge kind. Older gateways omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge: Option<ChallengeKind>,
}

impl GatewayFrame {
    pub fn prompt(message: impl Into<String>, challenge: Option<ChallengeKind>) -> Self {
        Self {
            status: GatewayStatus::Prompt,
            message: message.into(),
            challenge,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: GatewayStatus::Success,
            message: message.into(),
            challenge: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: GatewayStatus::Error,
            message: message.into(),
            challenge: None,
        }
    }
}

/// Tuning for a handshake flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeConfig {
    /// Full-duplex gateway endpoint, for example `wss://host/api/ws/generate_session`.
    pub endpoint: String,
    /// Upper bound on the wait for the next gateway frame after a send.
    ///
    /// `None` waits indefinitely.
    pub prompt_timeout: Option<Duration>,
    /// Pause between `Done` and the completion hook.
    pub completion_grace: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            prompt_timeout: Some(Duration::from_millis(DEFAULT_PROMPT_TIMEOUT_MS)),
            completion_grace: Duration::from_millis(DEFAULT_COMPLETION_GRACE_MS),
        }
    }
}

/// Reference kept by the client after a successful handshake.
///
/// The credential itself stays with the gateway; later listing, download or
/// deletion goes through the phone number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletedSession {
    pub phone_number: String,
    /// Final gateway message.
    pub message: String,
}

/// How a flow handed control back to its caller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FlowOutcome {
    /// Handshake reached `Done` and the completion hook ran.
    Completed,
    /// User cancelled; the channel was released.
    Cancelled,
}

/// Command channel input accepted by the handshake runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum HandshakeCommand {
    /// Collect credentials and start a fresh attempt.
    Submit(CredentialForm),
    /// Answer the pending challenge.
    Respond {
        /// Code digits or second-factor password.
        value: String,
    },
    /// Discard a failed attempt and return to `Idle`, keeping the credentials.
    Retry,
    /// Release everything and hand control back to the caller.
    Cancel,
}

/// Event channel output emitted by the handshake runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum HandshakeEvent {
    /// Lifecycle transition.
    StateChanged {
        /// New state.
        state: HandshakeState,
    },
    /// Gateway issued a challenge.
    Prompt {
        /// Classified challenge kind.
        kind: ChallengeKind,
        /// Gateway prompt text.
        message: String,
    },
    /// Gateway reported success.
    Completed {
        /// Gateway success text.
        message: String,
    },
    /// Attempt failed; only retry or cancel remain.
    Failed {
        /// Failure details.
        error: HandshakeError,
    },
    /// A command was rejected without changing state.
    Rejected {
        /// Rejection reason.
        error: HandshakeError,
    },
    /// Flow handed control back to the caller; no further events follow.
    Finished {
        /// How the flow ended.
        outcome: FlowOutcome,
    },
}
