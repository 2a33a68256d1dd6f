//! Peer transport for the file data channel.
//!
//! The [`PeerConnector`], [`PeerConnection`] and [`DataChannel`] traits are
//! the seam between the negotiation logic and a concrete peer-to-peer
//! stack. Every asynchronous occurrence on a connection (local candidate
//! discovered, channel opened, message received, channel closed) is
//! delivered as an [`RtcEvent`] on the queue handed to
//! [`PeerConnector::connect`], so the owner can drive the session as a
//! plain state machine.
//!
//! [`LoopbackNetwork`] implements the seam in-process: descriptions carry
//! an ICE username fragment, candidates must match it, and two
//! connections are joined once both have applied each other's
//! description and at least one valid candidate.

pub mod config;
pub mod error;
pub mod loopback;
pub mod transport;

pub use config::{IceServer, RtcConfig};
pub use error::RtcError;
pub use loopback::LoopbackNetwork;
pub use transport::{
    DataChannel, IceConnectionState, PeerConnection, PeerConnector, ReadyState, RtcEvent,
    RtcFuture, SignalingState,
};
