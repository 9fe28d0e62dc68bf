use std::time::Duration;

use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    channel::{Connector, HandshakeChannel},
    error::HandshakeError,
    state_machine::HandshakeStateMachine,
    types::{AuthRequest, GatewayFrame, HandshakeEvent, HandshakeState},
};

/// One handshake attempt: its state machine plus the channel it owns.
///
/// Never reused. A retry discards the session and the next submission builds
/// a new one.
pub struct HandshakeSession {
    id: Uuid,
    machine: HandshakeStateMachine,
    channel: Option<HandshakeChannel>,
    prompt_timeout: Option<Duration>,
    reply_deadline: Option<Instant>,
}

impl HandshakeSession {
    pub fn new(prompt_timeout: Option<Duration>) -> Self {
        Self {
            id: Uuid::new_v4(),
            machine: HandshakeStateMachine::default(),
            channel: None,
            prompt_timeout,
            reply_deadline: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> HandshakeState {
        self.machine.state()
    }

    pub fn machine(&self) -> &HandshakeStateMachine {
        &self.machine
    }

    pub fn has_open_channel(&self) -> bool {
        self.channel
            .as_ref()
            .is_some_and(HandshakeChannel::is_open)
    }

    /// Whether `next_events` has anything to wait for.
    pub fn is_listening(&self) -> bool {
        self.has_open_channel() && !self.machine.state().is_terminal()
    }

    /// Open the channel and send the `start` frame.
    ///
    /// `Err` means the request was rejected without side effects. Open or send
    /// failures come back as `Failed` events with the channel already closed.
    pub async fn start(
        &mut self,
        connector: &dyn Connector,
        endpoint: &str,
        request: &AuthRequest,
    ) -> Result<Vec<HandshakeEvent>, HandshakeError> {
        let frame = self.machine.begin(request)?;
        info!(session_id = %self.id, %endpoint, "starting handshake");

        let mut channel = match HandshakeChannel::open(connector, endpoint).await {
            Ok(channel) => channel,
            Err(err) => return Ok(self.machine.on_transport_failure(err)),
        };
        if let Err(err) = channel.send(&frame).await {
            channel.close().await;
            return Ok(self.machine.on_transport_failure(err));
        }

        self.channel = Some(channel);
        self.arm_deadline();
        Ok(Vec::new())
    }

    /// Send the answer to the pending challenge.
    pub async fn respond(&mut self, value: &str) -> Result<Vec<HandshakeEvent>, HandshakeError> {
        let frame = self.machine.respond(value)?;

        let sent = match self.channel.as_mut() {
            Some(channel) => channel.send(&frame).await,
            None => Err(HandshakeError::channel(
                "channel_closed",
                "handshake channel is not open",
            )),
        };
        if let Err(err) = sent {
            let events = self.machine.on_transport_failure(err);
            self.close().await;
            return Ok(events);
        }

        debug!(session_id = %self.id, state = ?self.machine.state(), "challenge response sent");
        self.arm_deadline();
        Ok(Vec::new())
    }

    /// Wait for the next inbound frame without applying it.
    ///
    /// Cancel-safe: dropping the future loses no frame and leaves the machine
    /// untouched. Bounded by the prompt timeout only while a reply is in
    /// flight; while the user is answering a challenge the wait is open-ended.
    /// The deadline is absolute, so re-polling does not extend it.
    pub async fn recv_inbound(&mut self) -> Result<GatewayFrame, HandshakeError> {
        let deadline = self.reply_deadline.filter(|_| self.machine.is_suspended());
        let Some(channel) = self.channel.as_mut() else {
            return Err(HandshakeError::channel(
                "channel_closed",
                "handshake channel is not open",
            ));
        };

        match deadline {
            Some(deadline) => match timeout_at(deadline, channel.recv()).await {
                Ok(received) => received,
                Err(_) => Err(HandshakeError::timeout(
                    self.prompt_timeout.unwrap_or_default(),
                )),
            },
            None => channel.recv().await,
        }
    }

    /// Apply one result of [`recv_inbound`](Self::recv_inbound).
    ///
    /// The transition happens before the first await, and on reaching a
    /// terminal state the channel is closed before returning.
    pub async fn apply_inbound(
        &mut self,
        received: Result<GatewayFrame, HandshakeError>,
    ) -> Vec<HandshakeEvent> {
        let events = match received {
            Ok(frame) => match self.machine.on_gateway_frame(frame) {
                Ok(events) => events,
                Err(err) => {
                    warn!(session_id = %self.id, error = %err, "ignoring gateway frame");
                    Vec::new()
                }
            },
            Err(err) => {
                warn!(session_id = %self.id, error = %err, "handshake channel failed");
                self.machine.on_transport_failure(err)
            }
        };

        if !self.machine.is_suspended() {
            self.reply_deadline = None;
        }
        if self.machine.state().is_terminal() {
            self.close().await;
        }
        events
    }

    /// Receive and apply the next gateway frame.
    ///
    /// Not cancel-safe once a frame has arrived; select on
    /// [`recv_inbound`](Self::recv_inbound) instead.
    pub async fn next_events(&mut self) -> Vec<HandshakeEvent> {
        if self.channel.is_none() {
            return Vec::new();
        }
        let received = self.recv_inbound().await;
        self.apply_inbound(received).await
    }

    /// `Failed -> Idle`: closes the channel first, then resets the machine.
    pub async fn retry(&mut self) -> Result<HandshakeEvent, HandshakeError> {
        if self.machine.state() != HandshakeState::Failed {
            return Err(HandshakeError::invalid_state(self.machine.state(), "retry"));
        }
        self.close().await;
        self.reply_deadline = None;
        self.machine.retry()
    }

    /// Graceful close. Returns `true` only for the call that released the channel.
    pub async fn close(&mut self) -> bool {
        match self.channel.as_mut() {
            Some(channel) => channel.close().await,
            None => false,
        }
    }

    /// Synchronous release for cancellation and teardown.
    pub fn release(&mut self) -> bool {
        self.channel
            .as_mut()
            .is_some_and(HandshakeChannel::release)
    }

    fn arm_deadline(&mut self) {
        self.reply_deadline = self
            .prompt_timeout
            .map(|limit| Instant::now() + limit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::HandshakeErrorCategory,
        memory::memory_gateway,
        types::{ChallengeKind, ClientFrame},
    };

    fn request() -> AuthRequest {
        AuthRequest {
            application_id: 12_345,
            application_secret: "abc".into(),
            phone_number: "+551199999999".into(),
        }
    }

    #[tokio::test]
    async fn sends_exactly_one_start_frame() {
        let (connector, mut peers) = memory_gateway();
        let mut session = HandshakeSession::new(None);

        let events = session
            .start(&connector, "mem://gateway", &request())
            .await
            .expect("start should work");
        assert!(events.is_empty());

        let mut peer = peers.recv().await.expect("peer");
        assert_eq!(
            peer.next_client_frame().await,
            Some(ClientFrame::start(&request()))
        );

        let err = session
            .start(&connector, "mem://gateway", &request())
            .await
            .expect_err("second start must be rejected");
        assert_eq!(err.code, "invalid_state_transition");
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn refused_connection_fails_the_attempt() {
        let (connector, _peers) = memory_gateway();
        connector.refuse_connections(true);
        let mut session = HandshakeSession::new(None);

        let events = session
            .start(&connector, "mem://gateway", &request())
            .await
            .expect("start returns failure events");
        assert_eq!(session.state(), HandshakeState::Failed);
        assert!(matches!(
            events.last(),
            Some(HandshakeEvent::Failed { error }) if error.code == "connect_failed"
        ));
        assert!(!session.has_open_channel());
    }

    #[tokio::test]
    async fn success_closes_channel_exactly_once() {
        let (connector, mut peers) = memory_gateway();
        let mut session = HandshakeSession::new(None);
        session
            .start(&connector, "mem://gateway", &request())
            .await
            .expect("start");
        let mut peer = peers.recv().await.expect("peer");
        peer.next_client_frame().await.expect("start frame");

        peer.reply(GatewayFrame::prompt("code", Some(ChallengeKind::Code)));
        session.next_events().await;
        session.respond("54321").await.expect("respond");
        assert_eq!(
            peer.next_client_frame().await,
            Some(ClientFrame::response("54321"))
        );

        peer.reply(GatewayFrame::success("Sessão criada"));
        let events = session.next_events().await;
        assert_eq!(session.state(), HandshakeState::Done);
        assert!(events.contains(&HandshakeEvent::Completed {
            message: "Sessão criada".into()
        }));
        assert!(!session.has_open_channel());
        assert!(!session.close().await);
        assert_eq!(peer.shutdown_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_gateway_times_out_while_reply_pending() {
        let (connector, mut peers) = memory_gateway();
        let mut session = HandshakeSession::new(Some(Duration::from_secs(30)));
        session
            .start(&connector, "mem://gateway", &request())
            .await
            .expect("start");
        let _peer = peers.recv().await.expect("peer");

        let events = session.next_events().await;
        assert_eq!(session.state(), HandshakeState::Failed);
        assert!(matches!(
            events.last(),
            Some(HandshakeEvent::Failed { error }) if error.category == HandshakeErrorCategory::Timeout
        ));
        assert!(!session.has_open_channel());
    }

    #[tokio::test]
    async fn transport_drop_while_awaiting_password_is_terminal() {
        let (connector, mut peers) = memory_gateway();
        let mut session = HandshakeSession::new(None);
        session
            .start(&connector, "mem://gateway", &request())
            .await
            .expect("start");
        let peer = peers.recv().await.expect("peer");

        peer.reply(GatewayFrame::prompt("2FA", Some(ChallengeKind::Password)));
        session.next_events().await;
        assert_eq!(session.state(), HandshakeState::AwaitingPassword);

        peer.fail("connection reset by peer");
        session.next_events().await;
        assert_eq!(session.state(), HandshakeState::Failed);
        assert!(!session.has_open_channel());
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn retry_requires_failure_and_leaves_channel_closed() {
        let (connector, mut peers) = memory_gateway();
        let mut session = HandshakeSession::new(None);
        session
            .start(&connector, "mem://gateway", &request())
            .await
            .expect("start");
        let peer = peers.recv().await.expect("peer");

        assert!(session.retry().await.is_err());

        peer.reply(GatewayFrame::error("Invalid code"));
        session.next_events().await;
        session.retry().await.expect("retry from failed");
        assert_eq!(session.state(), HandshakeState::Idle);
        assert!(!session.has_open_channel());
        assert!(peer.is_released());
    }

    #[tokio::test]
    async fn abandoned_receive_keeps_frame_and_state() {
        let (connector, mut peers) = memory_gateway();
        let mut session = HandshakeSession::new(None);
        session
            .start(&connector, "mem://gateway", &request())
            .await
            .expect("start");
        let peer = peers.recv().await.expect("peer");

        tokio::select! {
            biased;
            _ = std::future::ready(()) => {}
            _ = session.recv_inbound() => panic!("nothing has been sent yet"),
        }
        peer.reply(GatewayFrame::success("Sessão criada"));
        tokio::select! {
            biased;
            _ = std::future::ready(()) => {}
            _ = session.recv_inbound() => panic!("ready branch must win"),
        }
        assert!(session.machine().is_suspended());
        assert!(session.has_open_channel());

        let received = session.recv_inbound().await;
        assert_eq!(session.state(), HandshakeState::Idle);
        let events = session.apply_inbound(received).await;
        assert_eq!(session.state(), HandshakeState::Done);
        assert!(events.contains(&HandshakeEvent::Completed {
            message: "Sessão criada".into()
        }));
        assert!(!session.has_open_channel());
    }
}
