//! Error types for peer sessions.

use printlink_data_channel::RtcError;
use printlink_signaling::SignalingError;
use printlink_transfer::TransferError;

/// Errors surfaced by the peer connection manager.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerError {
    #[error("signaling unavailable: {0}")]
    SignalingUnavailable(String),

    #[error("no offer found for job {0}")]
    NoOfferFound(String),

    #[error("negotiation rejected: {0}")]
    NegotiationRejected(String),

    #[error("channel closed before the transfer completed: {0}")]
    ChannelClosedPrematurely(String),

    #[error("local resource blocked: {0}")]
    LocalResourceBlocked(String),

    #[error("no active session")]
    NoActiveSession,

    #[error("session closed")]
    SessionClosed,
}

impl From<SignalingError> for PeerError {
    fn from(e: SignalingError) -> Self {
        match e {
            SignalingError::NoOfferFound(job) => PeerError::NoOfferFound(job),
            SignalingError::Store(store) => PeerError::SignalingUnavailable(store.to_string()),
            other => PeerError::NegotiationRejected(other.to_string()),
        }
    }
}

impl From<RtcError> for PeerError {
    fn from(e: RtcError) -> Self {
        match e {
            RtcError::ResourceBlocked(reason) => PeerError::LocalResourceBlocked(reason),
            RtcError::Closed => PeerError::SessionClosed,
            other => PeerError::NegotiationRejected(other.to_string()),
        }
    }
}

impl From<TransferError> for PeerError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::Cancelled => PeerError::SessionClosed,
            other => PeerError::ChannelClosedPrematurely(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use printlink_store::StoreError;

    #[test]
    fn taxonomy_mapping() {
        assert_eq!(
            PeerError::from(SignalingError::NoOfferFound("j".into())),
            PeerError::NoOfferFound("j".into())
        );
        assert!(matches!(
            PeerError::from(SignalingError::Store(StoreError::Unavailable("down".into()))),
            PeerError::SignalingUnavailable(_)
        ));
        assert!(matches!(
            PeerError::from(SignalingError::StaleOffer("j".into())),
            PeerError::NegotiationRejected(_)
        ));
        assert!(matches!(
            PeerError::from(RtcError::ResourceBlocked("no sockets".into())),
            PeerError::LocalResourceBlocked(_)
        ));
        assert!(matches!(
            PeerError::from(TransferError::ChannelClosedPrematurely { received: 3 }),
            PeerError::ChannelClosedPrematurely(_)
        ));
    }
}
