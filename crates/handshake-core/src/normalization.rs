use crate::types::{ChallengeKind, GatewayFrame, GatewayStatus};

/// Lowercased prompt fragments that mark a one-time-code challenge when the
/// gateway does not send a structured `challenge` field.
const CODE_PROMPT_MARKERS: [&str; 3] = ["código", "codigo", "code"];

/// Gateway frame after challenge classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewaySignal {
    /// Gateway wants more input.
    Challenge { kind: ChallengeKind, message: String },
    /// Credential issued.
    Success { message: String },
    /// Gateway aborted the attempt.
    Rejected { message: String },
}

/// Convert a raw gateway frame into a typed signal.
pub fn normalize_gateway_frame(frame: GatewayFrame) -> GatewaySignal {
    match frame.status {
        GatewayStatus::Prompt => GatewaySignal::Challenge {
            kind: frame
                .challenge
                .unwrap_or_else(|| classify_prompt_text(&frame.message)),
            message: frame.message,
        },
        GatewayStatus::Success => GatewaySignal::Success {
            message: frame.message,
        },
        GatewayStatus::Error => GatewaySignal::Rejected {
            message: frame.message,
        },
    }
}

/// Legacy text heuristic for gateways that omit the challenge kind.
pub fn classify_prompt_text(message: &str) -> ChallengeKind {
    let lowered = message.to_lowercase();
    if CODE_PROMPT_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        ChallengeKind::Code
    } else {
        ChallengeKind::Password
    }
}
