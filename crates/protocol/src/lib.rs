//! Wire types for printlink sender/agent coordination.
//!
//! Everything that crosses a process boundary lives here: the job record
//! written to the shared document store, the session descriptions and ICE
//! candidates exchanged through it, and the messages carried over the
//! peer data channel.

pub mod constants;
pub mod frame;
pub mod job;
pub mod types;

pub use constants::*;
pub use frame::ChannelMessage;
pub use job::{IceCandidate, JobRecord, Role, SdpType, SessionDescription};
pub use types::{
    ColorMode, FileMetadata, JobStatus, PageRangeError, PaperSize, PrintSpec, Sides,
    TransferProgress,
};
