use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    channel::Connector,
    error::HandshakeError,
    session::HandshakeSession,
    types::{
        CompletedSession, CredentialForm, FlowOutcome, GatewayFrame, HandshakeConfig,
        HandshakeEvent, HandshakeState,
    },
};

/// Drives handshake attempts for one front-end context.
///
/// Owns the entered credentials and at most one [`HandshakeSession`]. The
/// session, and with it the channel, is dropped on retry, cancel and when the
/// flow itself is dropped.
pub struct AuthFlow {
    config: HandshakeConfig,
    connector: Arc<dyn Connector>,
    credentials: Option<CredentialForm>,
    session: Option<HandshakeSession>,
}

impl AuthFlow {
    pub fn new(config: HandshakeConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            credentials: None,
            session: None,
        }
    }

    pub fn config(&self) -> &HandshakeConfig {
        &self.config
    }

    pub fn state(&self) -> HandshakeState {
        self.session
            .as_ref()
            .map(HandshakeSession::state)
            .unwrap_or_default()
    }

    /// Credentials of the current or last failed attempt.
    pub fn credentials(&self) -> Option<&CredentialForm> {
        self.credentials.as_ref()
    }

    pub fn session(&self) -> Option<&HandshakeSession> {
        self.session.as_ref()
    }

    pub fn last_prompt(&self) -> Option<&str> {
        self.session
            .as_ref()
            .and_then(|session| session.machine().last_prompt())
    }

    /// Whether an inbound frame can currently arrive.
    pub fn is_listening(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(HandshakeSession::is_listening)
    }

    /// Validate the form and start a brand-new attempt.
    ///
    /// Validation errors are returned before any session or connection exists.
    pub async fn submit(
        &mut self,
        form: CredentialForm,
    ) -> Result<Vec<HandshakeEvent>, HandshakeError> {
        if let Some(session) = &self.session {
            return Err(HandshakeError::invalid_state(session.state(), "submit"));
        }
        let request = form.collect()?;
        self.credentials = Some(form);

        let mut session = HandshakeSession::new(self.config.prompt_timeout);
        let events = session
            .start(self.connector.as_ref(), &self.config.endpoint, &request)
            .await?;
        self.session = Some(session);
        Ok(events)
    }

    /// Submit again with the preserved credentials.
    pub async fn resubmit(&mut self) -> Result<Vec<HandshakeEvent>, HandshakeError> {
        let form = self
            .credentials
            .clone()
            .ok_or_else(|| HandshakeError::validation_missing("credentials"))?;
        self.submit(form).await
    }

    pub async fn respond(&mut self, value: &str) -> Result<Vec<HandshakeEvent>, HandshakeError> {
        let Some(session) = self.session.as_mut() else {
            return Err(HandshakeError::invalid_state(
                HandshakeState::Idle,
                "respond",
            ));
        };
        session.respond(value).await
    }

    /// Wait for and apply the next gateway frame.
    ///
    /// Returns immediately with no events when nothing is listening.
    pub async fn next_events(&mut self) -> Vec<HandshakeEvent> {
        match self.session.as_mut() {
            Some(session) if session.is_listening() => session.next_events().await,
            _ => Vec::new(),
        }
    }

    /// Cancel-safe wait for the next inbound frame of the live attempt.
    pub async fn recv_inbound(&mut self) -> Result<GatewayFrame, HandshakeError> {
        match self.session.as_mut() {
            Some(session) => session.recv_inbound().await,
            None => Err(HandshakeError::channel(
                "channel_closed",
                "no handshake attempt is running",
            )),
        }
    }

    /// Apply a received frame or receive failure to the live attempt.
    pub async fn apply_inbound(
        &mut self,
        received: Result<GatewayFrame, HandshakeError>,
    ) -> Vec<HandshakeEvent> {
        match self.session.as_mut() {
            Some(session) => session.apply_inbound(received).await,
            None => Vec::new(),
        }
    }

    /// Discard a failed attempt, keeping the credential fields.
    pub async fn retry(&mut self) -> Result<Vec<HandshakeEvent>, HandshakeError> {
        let Some(session) = self.session.as_mut() else {
            return Err(HandshakeError::invalid_state(HandshakeState::Idle, "retry"));
        };
        let event = session.retry().await?;
        info!(session_id = %session.id(), "discarding failed handshake session");
        self.session = None;
        Ok(vec![event])
    }

    /// Release the channel synchronously and drop all attempt state.
    pub fn cancel(&mut self) -> Vec<HandshakeEvent> {
        if let Some(mut session) = self.session.take() {
            let released = session.release();
            debug!(session_id = %session.id(), released, "handshake cancelled");
        }
        self.credentials = None;
        vec![HandshakeEvent::Finished {
            outcome: FlowOutcome::Cancelled,
        }]
    }

    /// Reference handed to the completion hook once the attempt is `Done`.
    pub fn completed_session(&self, message: impl Into<String>) -> Option<CompletedSession> {
        if self.state() != HandshakeState::Done {
            return None;
        }
        let credentials = self.credentials.as_ref()?;
        Some(CompletedSession {
            phone_number: credentials.phone_number.trim().to_owned(),
            message: message.into(),
        })
    }
}
