//! Error types for the peer transport.

/// Errors produced by peer connections and data channels.
#[derive(Debug, thiserror::Error)]
pub enum RtcError {
    #[error("operation not valid in signaling state {0}")]
    InvalidState(String),

    #[error("invalid session description: {0}")]
    InvalidDescription(String),

    #[error("data channel {0} is not open")]
    ChannelNotOpen(String),

    #[error("message of {size} bytes exceeds the {max} byte limit")]
    MessageTooLarge { size: usize, max: usize },

    #[error("local resource unavailable: {0}")]
    ResourceBlocked(String),

    #[error("connection closed")]
    Closed,
}
