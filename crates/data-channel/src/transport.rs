//! Transport traits and the events they emit.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use printlink_protocol::{ChannelMessage, IceCandidate, SessionDescription};

use crate::config::RtcConfig;
use crate::error::RtcError;

/// A boxed future returned by transport methods.
pub type RtcFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RtcError>> + Send + 'a>>;

/// Offer/answer state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalingState::Stable => "stable",
            SignalingState::HaveLocalOffer => "have-local-offer",
            SignalingState::HaveRemoteOffer => "have-remote-offer",
            SignalingState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Network path state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// State of a data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Something that happened on a connection or one of its channels.
pub enum RtcEvent {
    /// A local candidate was gathered and should be sent to the peer.
    LocalCandidate(IceCandidate),
    IceStateChanged(IceConnectionState),
    /// The peer opened a channel on this connection.
    DataChannel(Arc<dyn DataChannel>),
    ChannelOpen { label: String },
    ChannelMessage { label: String, message: ChannelMessage },
    ChannelClosed { label: String },
    /// The send buffer drained below its threshold.
    BufferedAmountLow { label: String },
}

impl fmt::Debug for RtcEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtcEvent::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            RtcEvent::IceStateChanged(s) => f.debug_tuple("IceStateChanged").field(s).finish(),
            RtcEvent::DataChannel(c) => f.debug_tuple("DataChannel").field(&c.label()).finish(),
            RtcEvent::ChannelOpen { label } => {
                f.debug_struct("ChannelOpen").field("label", label).finish()
            }
            RtcEvent::ChannelMessage { label, message } => f
                .debug_struct("ChannelMessage")
                .field("label", label)
                .field("len", &message.len())
                .finish(),
            RtcEvent::ChannelClosed { label } => {
                f.debug_struct("ChannelClosed").field("label", label).finish()
            }
            RtcEvent::BufferedAmountLow { label } => f
                .debug_struct("BufferedAmountLow")
                .field("label", label)
                .finish(),
        }
    }
}

/// Creates peer connections.
pub trait PeerConnector: Send + Sync {
    /// Opens a new connection. All of its events go to `events`.
    fn connect(
        &self,
        config: &RtcConfig,
        events: mpsc::UnboundedSender<RtcEvent>,
    ) -> RtcFuture<'_, Arc<dyn PeerConnection>>;
}

/// One peer-to-peer connection.
pub trait PeerConnection: Send + Sync {
    fn create_offer(&self) -> RtcFuture<'_, SessionDescription>;

    /// Only valid after a remote offer has been applied.
    fn create_answer(&self) -> RtcFuture<'_, SessionDescription>;

    fn set_local_description(&self, description: SessionDescription) -> RtcFuture<'_, ()>;

    fn set_remote_description(&self, description: SessionDescription) -> RtcFuture<'_, ()>;

    /// Adds a peer candidate. Candidates arriving before the remote
    /// description are queued; candidates for another session are ignored.
    fn add_ice_candidate(&self, candidate: IceCandidate) -> RtcFuture<'_, ()>;

    /// Creates a channel that opens once the peers are connected.
    fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, RtcError>;

    fn signaling_state(&self) -> SignalingState;

    fn has_remote_description(&self) -> bool;

    /// Closes the connection and all of its channels. Idempotent.
    fn close(&self);
}

/// An ordered, reliable message channel.
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    fn ready_state(&self) -> ReadyState;

    /// Queues one message for delivery.
    fn send(&self, message: ChannelMessage) -> Result<(), RtcError>;

    /// Bytes queued but not yet handed to the network.
    fn buffered_amount(&self) -> usize;

    /// Closes the channel on both ends. Idempotent.
    fn close(&self);
}
