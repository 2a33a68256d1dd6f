use printlink_peer_connection::PeerError;
use printlink_protocol::JobStatus;
use printlink_signaling::SignalingError;
use printlink_store::StoreError;
use printlink_transfer::TransferError;

use crate::surface::RenderError;

/// Errors produced while coordinating a print job.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("job {job}: {event} is not allowed while {from}")]
    InvalidTransition {
        job: String,
        from: JobStatus,
        event: &'static str,
    },

    #[error("job {0} was deleted")]
    Deleted(String),

    #[error("job {job} failed: {reason}")]
    Failed { job: String, reason: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("peer error: {0}")]
    Peer(#[from] PeerError),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("render error: {0}")]
    Render(#[from] RenderError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
