use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::HandshakeState;

/// Message shown to the user for transport-level failures.
pub const CONNECTIVITY_MESSAGE: &str =
    "Could not reach the authentication gateway. Check that the backend is running and try again.";

/// Broad error category used for user-facing handling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HandshakeErrorCategory {
    /// Missing or malformed credential field, resolved locally.
    Validation,
    /// Connection open/send/receive failure.
    Channel,
    /// Gateway-issued `{"status":"error"}`.
    Gateway,
    /// Gateway did not answer within the prompt timeout.
    Timeout,
    /// Gateway frame could not be decoded or arrived out of turn.
    Protocol,
    /// Command issued in a state that does not accept it.
    Internal,
}

/// Stable handshake error payload emitted across the command/event boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct HandshakeError {
    /// High-level error category.
    pub category: HandshakeErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl HandshakeError {
    /// Construct a new handshake error.
    pub fn new(
        category: HandshakeErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    /// A required field was left empty.
    pub fn validation_missing(field: &str) -> Self {
        Self::new(
            HandshakeErrorCategory::Validation,
            "missing_field",
            format!("{field} is required"),
        )
    }

    /// A field is present but unusable.
    pub fn invalid_field(field: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::new(
            HandshakeErrorCategory::Validation,
            "invalid_field",
            format!("{field} is invalid: {reason}"),
        )
    }

    /// Transport failure.
    pub fn channel(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(HandshakeErrorCategory::Channel, code, message)
    }

    /// Gateway rejection; the text is kept verbatim.
    pub fn gateway(message: impl Into<String>) -> Self {
        Self::new(HandshakeErrorCategory::Gateway, "gateway_error", message)
    }

    /// No gateway frame within `after`.
    pub fn timeout(after: Duration) -> Self {
        Self::new(
            HandshakeErrorCategory::Timeout,
            "prompt_timeout",
            format!("no gateway response within {} ms", after.as_millis()),
        )
    }

    pub fn protocol(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(HandshakeErrorCategory::Protocol, code, message)
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_state(current: HandshakeState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            HandshakeErrorCategory::Internal,
            "invalid_state_transition",
            format!("cannot run '{action}' while handshake is in state {current:?}"),
        )
    }

    /// Whether this error ends the current attempt.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.category,
            HandshakeErrorCategory::Channel
                | HandshakeErrorCategory::Gateway
                | HandshakeErrorCategory::Timeout
                | HandshakeErrorCategory::Protocol
        )
    }

    /// Text suitable for direct display.
    pub fn user_message(&self) -> String {
        match self.category {
            HandshakeErrorCategory::Channel | HandshakeErrorCategory::Timeout => {
                CONNECTIVITY_MESSAGE.to_owned()
            }
            _ => self.message.clone(),
        }
    }
}
