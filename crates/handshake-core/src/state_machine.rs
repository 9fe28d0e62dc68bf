use crate::{
    error::HandshakeError,
    normalization::{GatewaySignal, normalize_gateway_frame},
    types::{AuthRequest, ClientFrame, GatewayFrame, GatewayStatus, HandshakeEvent, HandshakeState},
};

/// Sans-IO handshake protocol state.
///
/// Commands return the frame to put on the wire; inbound frames and transport
/// failures return the events to publish. `reply_pending` is set between a
/// send and the next gateway frame, which is the only window in which a
/// prompt or success frame is accepted.
#[derive(Debug, Clone, Default)]
pub struct HandshakeStateMachine {
    state: HandshakeState,
    reply_pending: bool,
    last_prompt: Option<String>,
    last_error: Option<HandshakeError>,
}

impl HandshakeStateMachine {
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn last_prompt(&self) -> Option<&str> {
        self.last_prompt.as_deref()
    }

    pub fn last_error(&self) -> Option<&HandshakeError> {
        self.last_error.as_ref()
    }

    /// Suspended between a send and the next gateway frame.
    pub fn is_suspended(&self) -> bool {
        self.reply_pending
    }

    /// A challenge is pending and no answer is in flight.
    pub fn can_respond(&self) -> bool {
        self.state.is_awaiting_input() && !self.reply_pending
    }

    /// Produce the `start` frame for a fresh attempt.
    pub fn begin(&mut self, request: &AuthRequest) -> Result<ClientFrame, HandshakeError> {
        if self.state != HandshakeState::Idle || self.reply_pending {
            return Err(HandshakeError::invalid_state(self.state, "submit"));
        }
        self.reply_pending = true;
        Ok(ClientFrame::start(request))
    }

    /// Produce the answer frame for the pending challenge.
    pub fn respond(&mut self, value: &str) -> Result<ClientFrame, HandshakeError> {
        if !self.can_respond() {
            return Err(HandshakeError::invalid_state(self.state, "respond"));
        }
        if value.trim().is_empty() {
            return Err(HandshakeError::validation_missing("challenge response"));
        }
        self.reply_pending = true;
        Ok(ClientFrame::response(value))
    }

    /// Apply one inbound gateway frame.
    pub fn on_gateway_frame(
        &mut self,
        frame: GatewayFrame,
    ) -> Result<Vec<HandshakeEvent>, HandshakeError> {
        if self.state.is_terminal() {
            return Err(HandshakeError::invalid_state(self.state, "gateway frame"));
        }
        // Error frames may arrive at any point; everything else answers a send.
        if !self.reply_pending && frame.status != GatewayStatus::Error {
            return Ok(self.fail(HandshakeError::protocol(
                "unsolicited_frame",
                format!(
                    "gateway sent {:?} while no reply was expected",
                    frame.status
                ),
            )));
        }
        self.reply_pending = false;

        let events = match normalize_gateway_frame(frame) {
            GatewaySignal::Challenge { kind, message } => {
                let next = kind.awaiting_state();
                let mut events = Vec::with_capacity(2);
                if next != self.state {
                    self.state = next;
                    events.push(HandshakeEvent::StateChanged { state: next });
                }
                self.last_prompt = Some(message.clone());
                events.push(HandshakeEvent::Prompt { kind, message });
                events
            }
            GatewaySignal::Success { message } => {
                self.state = HandshakeState::Done;
                vec![
                    HandshakeEvent::StateChanged {
                        state: HandshakeState::Done,
                    },
                    HandshakeEvent::Completed { message },
                ]
            }
            GatewaySignal::Rejected { message } => self.fail(HandshakeError::gateway(message)),
        };
        Ok(events)
    }

    /// Channel-level failure, timeout or unexpected close.
    ///
    /// No-op once terminal: closing the channel after `Done` is expected.
    pub fn on_transport_failure(&mut self, error: HandshakeError) -> Vec<HandshakeEvent> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        self.fail(error)
    }

    /// `Failed -> Idle`, dropping prompt and error state.
    pub fn retry(&mut self) -> Result<HandshakeEvent, HandshakeError> {
        if self.state != HandshakeState::Failed {
            return Err(HandshakeError::invalid_state(self.state, "retry"));
        }
        *self = Self::default();
        Ok(HandshakeEvent::StateChanged {
            state: HandshakeState::Idle,
        })
    }

    fn fail(&mut self, error: HandshakeError) -> Vec<HandshakeEvent> {
        self.state = HandshakeState::Failed;
        self.reply_pending = false;
        self.last_error = Some(error.clone());
        vec![
            HandshakeEvent::StateChanged {
                state: HandshakeState::Failed,
            },
            HandshakeEvent::Failed { error },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::HandshakeErrorCategory,
        types::{ChallengeKind, StartFrame},
    };

    fn request() -> AuthRequest {
        AuthRequest {
            application_id: 12_345,
            application_secret: "abc".into(),
            phone_number: "+551199999999".into(),
        }
    }

    fn started() -> HandshakeStateMachine {
        let mut sm = HandshakeStateMachine::default();
        sm.begin(&request()).expect("begin must work");
        sm
    }

    #[test]
    fn begin_emits_start_frame_once() {
        let mut sm = HandshakeStateMachine::default();
        let frame = sm.begin(&request()).expect("begin must work");
        assert_eq!(
            frame,
            ClientFrame::Start(StartFrame {
                api_id: 12_345,
                api_hash: "abc".into(),
                phone_number: "+551199999999".into(),
            })
        );
        assert!(sm.is_suspended());

        let err = sm.begin(&request()).expect_err("second begin must fail");
        assert_eq!(err.code, "invalid_state_transition");
    }

    #[test]
    fn code_prompt_moves_to_awaiting_code() {
        let mut sm = started();
        let events = sm
            .on_gateway_frame(GatewayFrame::prompt("Digite o código", None))
            .expect("prompt must apply");

        assert_eq!(sm.state(), HandshakeState::AwaitingCode);
        assert_eq!(sm.last_prompt(), Some("Digite o código"));
        assert!(sm.can_respond());
        assert_eq!(
            events,
            vec![
                HandshakeEvent::StateChanged {
                    state: HandshakeState::AwaitingCode
                },
                HandshakeEvent::Prompt {
                    kind: ChallengeKind::Code,
                    message: "Digite o código".into()
                },
            ]
        );
    }

    #[test]
    fn runs_code_then_password_round_trip() {
        let mut sm = started();
        sm.on_gateway_frame(GatewayFrame::prompt("code?", Some(ChallengeKind::Code)))
            .expect("code prompt");
        sm.respond("54321").expect("code response");
        assert_eq!(sm.state(), HandshakeState::AwaitingCode);

        sm.on_gateway_frame(GatewayFrame::prompt(
            "password?",
            Some(ChallengeKind::Password),
        ))
        .expect("password prompt");
        assert_eq!(sm.state(), HandshakeState::AwaitingPassword);
        sm.respond("hunter2").expect("password response");

        let events = sm
            .on_gateway_frame(GatewayFrame::success("ok"))
            .expect("success");
        assert_eq!(sm.state(), HandshakeState::Done);
        assert!(events.contains(&HandshakeEvent::Completed {
            message: "ok".into()
        }));
    }

    #[test]
    fn rejects_double_submit_while_suspended() {
        let mut sm = started();
        sm.on_gateway_frame(GatewayFrame::prompt("Digite o código", None))
            .expect("prompt");
        sm.respond("11111").expect("first response");

        let err = sm.respond("22222").expect_err("second response must fail");
        assert_eq!(err.code, "invalid_state_transition");
        assert!(sm.is_suspended());
    }

    #[test]
    fn rejects_response_without_pending_challenge() {
        let mut sm = HandshakeStateMachine::default();
        assert!(sm.respond("123").is_err());

        let mut sm = started();
        assert!(sm.respond("123").is_err());
    }

    #[test]
    fn rejects_empty_response_without_consuming_the_challenge() {
        let mut sm = started();
        sm.on_gateway_frame(GatewayFrame::prompt("Digite o código", None))
            .expect("prompt");

        let err = sm.respond("   ").expect_err("empty response must fail");
        assert_eq!(err.category, HandshakeErrorCategory::Validation);
        assert!(sm.can_respond());
    }

    #[test]
    fn gateway_error_fails_with_verbatim_text() {
        let mut sm = started();
        sm.on_gateway_frame(GatewayFrame::prompt("Digite o código", None))
            .expect("prompt");
        sm.respond("00000").expect("response");

        let events = sm
            .on_gateway_frame(GatewayFrame::error("Invalid code"))
            .expect("error frame");
        assert_eq!(sm.state(), HandshakeState::Failed);
        assert_eq!(
            events.last(),
            Some(&HandshakeEvent::Failed {
                error: HandshakeError::gateway("Invalid code")
            })
        );
        assert_eq!(
            sm.last_error().map(|err| err.message.as_str()),
            Some("Invalid code")
        );
    }

    #[test]
    fn gateway_error_is_accepted_while_user_is_typing() {
        let mut sm = started();
        sm.on_gateway_frame(GatewayFrame::prompt("Digite o código", None))
            .expect("prompt");

        sm.on_gateway_frame(GatewayFrame::error("Code expired"))
            .expect("error frame");
        assert_eq!(sm.state(), HandshakeState::Failed);
    }

    #[test]
    fn unsolicited_prompt_is_a_protocol_failure() {
        let mut sm = started();
        sm.on_gateway_frame(GatewayFrame::prompt("Digite o código", None))
            .expect("prompt");

        sm.on_gateway_frame(GatewayFrame::prompt("Digite o código", None))
            .expect("frame applies as failure");
        assert_eq!(sm.state(), HandshakeState::Failed);
        assert_eq!(
            sm.last_error().map(|err| err.category),
            Some(HandshakeErrorCategory::Protocol)
        );
    }

    #[test]
    fn terminal_states_reject_further_frames() {
        let mut sm = started();
        sm.on_gateway_frame(GatewayFrame::success("done"))
            .expect("success");

        let err = sm
            .on_gateway_frame(GatewayFrame::error("late"))
            .expect_err("frame after done must fail");
        assert_eq!(err.code, "invalid_state_transition");
        assert_eq!(sm.state(), HandshakeState::Done);
        assert!(
            sm.on_transport_failure(HandshakeError::channel("connection_closed", "closed"))
                .is_empty()
        );
        assert!(sm.respond("1").is_err());
    }

    #[test]
    fn transport_failure_while_awaiting_password_fails_attempt() {
        let mut sm = started();
        sm.on_gateway_frame(GatewayFrame::prompt(
            "password?",
            Some(ChallengeKind::Password),
        ))
        .expect("prompt");

        let events = sm.on_transport_failure(HandshakeError::channel("transport_error", "reset"));
        assert_eq!(sm.state(), HandshakeState::Failed);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn retry_resets_failed_machine_only() {
        let mut sm = started();
        assert!(sm.retry().is_err());

        sm.on_gateway_frame(GatewayFrame::error("Invalid code"))
            .expect("error");
        sm.retry().expect("retry from failed");
        assert_eq!(sm.state(), HandshakeState::Idle);
        assert_eq!(sm.last_prompt(), None);
        assert_eq!(sm.last_error(), None);
        assert!(!sm.is_suspended());
    }
}
