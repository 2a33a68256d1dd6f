//! Error types for the signaling exchange.

use printlink_protocol::SdpType;
use printlink_store::StoreError;

/// Errors produced while exchanging negotiation payloads.
#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("job {0} has no offer to answer")]
    NoOfferFound(String),

    #[error("job {job} already carries a different {sdp_type:?}")]
    DescriptionAlreadySet { job: String, sdp_type: SdpType },

    #[error("job {0} was already answered; refusing a fresh offer")]
    StaleOffer(String),

    #[error("malformed {field} on job {job}: {reason}")]
    Malformed {
        job: String,
        field: String,
        reason: String,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl SignalingError {
    /// Returns `true` when the store itself could not be reached.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SignalingError::Store(StoreError::Unavailable(_)))
    }
}
