//! Frontend-facing state reducer for `session-console`.

use handshake_core::{ChallengeKind, FlowOutcome, HandshakeEvent, HandshakeState};
use tracing::{debug, warn};

/// Where the console is in the handshake from the user's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleStep {
    /// Entering application id, secret and phone number.
    Credentials,
    /// Credentials sent, waiting for the first gateway frame.
    Connecting,
    /// Gateway asked for the login code.
    Code,
    /// Gateway asked for the second-factor password.
    Password,
    /// Answer sent, waiting for the gateway.
    Verifying,
    Completed,
    Failed,
    /// User cancelled.
    Closed,
}

/// Render-ready view of the console state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleSnapshot {
    pub step: ConsoleStep,
    pub status_text: String,
    pub prompt_text: Option<String>,
    pub error_text: Option<String>,
    /// Label for the single-line input, when one is expected.
    pub input_label: Option<&'static str>,
    /// Whether typed input should be treated as secret.
    pub input_hidden: bool,
    pub can_submit: bool,
    /// Whether retry/cancel should be offered.
    pub show_recovery: bool,
    pub finished: Option<FlowOutcome>,
}

/// Mutable console state that receives handshake events and user actions.
#[derive(Debug, Clone)]
pub struct ConsoleState {
    step: ConsoleStep,
    /// Challenge being answered, kept so a rejected answer can be retyped.
    challenge: Option<ChallengeKind>,
    prompt_text: Option<String>,
    error_text: Option<String>,
    completion_text: Option<String>,
    finished: Option<FlowOutcome>,
}

impl Default for ConsoleState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleState {
    pub fn new() -> Self {
        Self {
            step: ConsoleStep::Credentials,
            challenge: None,
            prompt_text: None,
            error_text: None,
            completion_text: None,
            finished: None,
        }
    }

    /// Current immutable snapshot for rendering.
    pub fn snapshot(&self) -> ConsoleSnapshot {
        let (input_label, input_hidden) = match self.step {
            ConsoleStep::Code => (Some("Verification code"), false),
            ConsoleStep::Password => (Some("Two-factor password"), true),
            _ => (None, false),
        };

        ConsoleSnapshot {
            step: self.step,
            status_text: self.status_text(),
            prompt_text: self.prompt_text.clone(),
            error_text: self.error_text.clone(),
            input_label,
            input_hidden,
            can_submit: matches!(
                self.step,
                ConsoleStep::Credentials | ConsoleStep::Code | ConsoleStep::Password
            ),
            show_recovery: self.step == ConsoleStep::Failed,
            finished: self.finished,
        }
    }

    pub fn mark_submitted(&mut self) {
        self.step = ConsoleStep::Connecting;
        self.error_text = None;
    }

    pub fn mark_response_sent(&mut self) {
        self.step = ConsoleStep::Verifying;
        self.error_text = None;
    }

    pub fn handle_event(&mut self, event: HandshakeEvent) {
        match event {
            HandshakeEvent::StateChanged { state } => {
                debug!(?state, "handshake state changed");
                self.step = match state {
                    HandshakeState::Idle => {
                        self.challenge = None;
                        self.prompt_text = None;
                        self.error_text = None;
                        ConsoleStep::Credentials
                    }
                    HandshakeState::AwaitingCode => {
                        self.challenge = Some(ChallengeKind::Code);
                        ConsoleStep::Code
                    }
                    HandshakeState::AwaitingPassword => {
                        self.challenge = Some(ChallengeKind::Password);
                        ConsoleStep::Password
                    }
                    HandshakeState::Done => {
                        self.challenge = None;
                        ConsoleStep::Completed
                    }
                    HandshakeState::Failed => {
                        self.challenge = None;
                        ConsoleStep::Failed
                    }
                };
            }
            HandshakeEvent::Prompt { kind, message } => {
                self.step = challenge_step(kind);
                self.challenge = Some(kind);
                self.prompt_text = Some(message);
                self.error_text = None;
            }
            HandshakeEvent::Completed { message } => {
                self.step = ConsoleStep::Completed;
                self.prompt_text = None;
                self.completion_text = Some(message);
            }
            HandshakeEvent::Failed { error } => {
                warn!(code = %error.code, "handshake failure surfaced to state");
                self.step = ConsoleStep::Failed;
                self.prompt_text = None;
                self.error_text = Some(error.user_message());
            }
            HandshakeEvent::Rejected { error } => {
                match (self.step, self.challenge) {
                    (ConsoleStep::Connecting, _) => self.step = ConsoleStep::Credentials,
                    (ConsoleStep::Verifying, Some(kind)) => self.step = challenge_step(kind),
                    _ => {}
                }
                self.error_text = Some(error.user_message());
            }
            HandshakeEvent::Finished { outcome } => {
                self.finished = Some(outcome);
                if outcome == FlowOutcome::Cancelled {
                    self.step = ConsoleStep::Closed;
                    self.prompt_text = None;
                    self.error_text = None;
                }
            }
        }
    }

    fn status_text(&self) -> String {
        match self.step {
            ConsoleStep::Credentials => "Enter application credentials".to_owned(),
            ConsoleStep::Connecting => "Connecting to gateway".to_owned(),
            ConsoleStep::Code => "Waiting for login code".to_owned(),
            ConsoleStep::Password => "Waiting for two-factor password".to_owned(),
            ConsoleStep::Verifying => "Verifying".to_owned(),
            ConsoleStep::Completed => self
                .completion_text
                .clone()
                .unwrap_or_else(|| "Session created".to_owned()),
            ConsoleStep::Failed => "Handshake failed".to_owned(),
            ConsoleStep::Closed => "Cancelled".to_owned(),
        }
    }
}

fn challenge_step(kind: ChallengeKind) -> ConsoleStep {
    match kind {
        ChallengeKind::Code => ConsoleStep::Code,
        ChallengeKind::Password => ConsoleStep::Password,
    }
}
