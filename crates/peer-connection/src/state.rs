//! Session state machine.

use std::fmt;

/// Lifecycle of one peer session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerState {
    New,
    /// Local description published, waiting for the peer's.
    Negotiating,
    /// Both descriptions applied. Path negotiation continues in the background.
    Connected,
    /// The data channel is open.
    Transferring,
    Closed,
    Failed { reason: String },
}

impl PeerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PeerState::Closed | PeerState::Failed { .. })
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerState::New => f.write_str("new"),
            PeerState::Negotiating => f.write_str("negotiating"),
            PeerState::Connected => f.write_str("connected"),
            PeerState::Transferring => f.write_str("transferring"),
            PeerState::Closed => f.write_str("closed"),
            PeerState::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// Inputs that move a session between states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateInput {
    LocalDescriptionPublished,
    RemoteDescriptionApplied,
    ChannelOpened,
    TransferFinished,
    Failure(String),
    Teardown,
}

/// Returns the state after `input`, or `None` if the input does not apply.
pub fn next_state(current: &PeerState, input: &StateInput) -> Option<PeerState> {
    use PeerState::*;

    match (current, input) {
        (_, StateInput::Teardown) => Some(Closed),
        (Closed | Failed { .. }, _) => None,
        (_, StateInput::Failure(reason)) => Some(Failed {
            reason: reason.clone(),
        }),
        (New, StateInput::LocalDescriptionPublished) => Some(Negotiating),
        (Negotiating, StateInput::RemoteDescriptionApplied) => Some(Connected),
        (Connected, StateInput::ChannelOpened) => Some(Transferring),
        (Transferring, StateInput::TransferFinished) => Some(Closed),
        _ => None,
    }
}
