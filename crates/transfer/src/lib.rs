//! Chunked blob transfer over the peer data channel.
//!
//! The sender splits a blob into binary frames of at most
//! [`CHUNK_SIZE`](printlink_protocol::CHUNK_SIZE) bytes and follows them
//! with a single textual end-of-transfer marker. The receiver appends
//! frames in arrival order and rebuilds the blob when the marker arrives.
//! A channel that closes before the marker is an incomplete transfer.

mod bundle;
mod frame;
mod progress;
mod receiver;
mod sender;
mod validation;

pub use bundle::{bundle_files, split_bundle};
pub use frame::{Frame, FrameSplitter, checksum_bytes, frame_count};
pub use progress::TransferRate;
pub use receiver::{PushOutcome, Reassembler};
pub use sender::ChunkedSender;
pub use validation::{
    ALLOWED_EXTENSIONS, FileCategory, FileValidation, FilesValidation, MAX_FILE_SIZE, MAX_FILES,
    MAX_TOTAL_SIZE, file_category, file_type_name, format_file_size, validate_file,
    validate_files, validate_staging_path,
};

use printlink_data_channel::RtcError;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("channel closed after {received} bytes, before the end-of-transfer marker")]
    ChannelClosedPrematurely { received: u64 },

    #[error("channel closed while sending")]
    ChannelClosed,

    #[error("unexpected text frame: {0:?}")]
    UnexpectedText(String),

    #[error("blob is {actual} bytes, files add up to {expected}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("checksum mismatch for {0}")]
    ChecksumMismatch(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("files rejected: {}", .0.join("; "))]
    Rejected(Vec<String>),

    #[error("cancelled")]
    Cancelled,

    #[error("transport error: {0}")]
    Rtc(#[from] RtcError),
}
