//! In-process transport joining connections created from one network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use printlink_protocol::{
    ChannelMessage, IceCandidate, MAX_MESSAGE_SIZE, SdpType, SessionDescription,
};

use crate::config::RtcConfig;
use crate::error::RtcError;
use crate::transport::{
    DataChannel, IceConnectionState, PeerConnection, PeerConnector, ReadyState, RtcEvent,
    RtcFuture, SignalingState,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Random lowercase hex string of `bytes` bytes.
fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill(buf.as_mut_slice());
    hex::encode(buf)
}

fn build_sdp(session_id: u64, ufrag: &str, pwd: &str, sdp_type: SdpType) -> String {
    let setup = match sdp_type {
        SdpType::Offer => "actpass",
        SdpType::Answer => "active",
    };
    let lines = [
        "v=0".to_string(),
        format!("o=- {session_id} 2 IN IP4 127.0.0.1"),
        "s=-".to_string(),
        "t=0 0".to_string(),
        "a=group:BUNDLE 0".to_string(),
        "m=application 9 UDP/DTLS/SCTP webrtc-datachannel".to_string(),
        "c=IN IP4 0.0.0.0".to_string(),
        format!("a=ice-ufrag:{ufrag}"),
        format!("a=ice-pwd:{pwd}"),
        format!("a=setup:{setup}"),
        "a=mid:0".to_string(),
        "a=sctp-port:5000".to_string(),
        format!("a=max-message-size:{MAX_MESSAGE_SIZE}"),
    ];
    lines.join("\r\n") + "\r\n"
}

fn extract_ufrag(sdp: &str) -> Result<String, RtcError> {
    if !sdp.starts_with("v=0") {
        return Err(RtcError::InvalidDescription("missing version line".into()));
    }
    sdp.lines()
        .find_map(|line| line.strip_prefix("a=ice-ufrag:"))
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| RtcError::InvalidDescription("missing ice-ufrag".into()))
}

struct NetworkShared {
    /// Live connections keyed by local username fragment.
    peers: Mutex<HashMap<String, Weak<LoopbackPeer>>>,
    blocked: AtomicBool,
}

/// Transport that joins connections created from the same network.
///
/// Clones share the network, so the sender and the print agent of a test
/// or demo each get a clone.
#[derive(Clone)]
pub struct LoopbackNetwork {
    shared: Arc<NetworkShared>,
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(NetworkShared {
                peers: Mutex::new(HashMap::new()),
                blocked: AtomicBool::new(false),
            }),
        }
    }

    /// While blocked, [`connect`](PeerConnector::connect) fails as if the
    /// local network stack refused to allocate a connection.
    pub fn set_blocked(&self, blocked: bool) {
        self.shared.blocked.store(blocked, Ordering::SeqCst);
    }

    /// Number of connections not yet closed.
    pub fn connection_count(&self) -> usize {
        lock(&self.shared.peers)
            .values()
            .filter(|p| p.strong_count() > 0)
            .count()
    }
}

impl NetworkShared {
    fn peer(&self, ufrag: &str) -> Option<Arc<LoopbackPeer>> {
        lock(&self.peers).get(ufrag).and_then(Weak::upgrade)
    }

    /// Joins two connections once each has accepted the other.
    fn try_link(&self, a_ufrag: &str, b_ufrag: &str) {
        // Held for the whole join so concurrent attempts serialize.
        let peers = lock(&self.peers);
        let (Some(a), Some(b)) = (
            peers.get(a_ufrag).and_then(Weak::upgrade),
            peers.get(b_ufrag).and_then(Weak::upgrade),
        ) else {
            return;
        };
        if !a.ready_to_link(b_ufrag) || !b.ready_to_link(a_ufrag) {
            return;
        }
        a.mark_linked();
        b.mark_linked();
        debug!(a = %a_ufrag, b = %b_ufrag, "loopback peers connected");

        let mut opened = Vec::new();
        for channel in a.unpaired_channels() {
            opened.push((Arc::clone(&channel), b.accept_channel(&channel)));
        }
        for channel in b.unpaired_channels() {
            opened.push((Arc::clone(&channel), a.accept_channel(&channel)));
        }
        for (local, remote) in opened {
            remote.open();
            local.open();
        }
    }
}

impl PeerConnector for LoopbackNetwork {
    fn connect(
        &self,
        config: &RtcConfig,
        events: mpsc::UnboundedSender<RtcEvent>,
    ) -> RtcFuture<'_, Arc<dyn PeerConnection>> {
        let config = config.clone();
        Box::pin(async move {
            if self.shared.blocked.load(Ordering::SeqCst) {
                return Err(RtcError::ResourceBlocked(
                    "loopback network refused the connection".into(),
                ));
            }
            let peer = Arc::new(LoopbackPeer {
                network: Arc::clone(&self.shared),
                ufrag: random_hex(4),
                pwd: random_hex(12),
                session_id: rand::thread_rng().gen_range(1..u64::MAX / 2),
                config,
                events,
                state: Mutex::new(PeerInner::default()),
            });
            lock(&self.shared.peers).insert(peer.ufrag.clone(), Arc::downgrade(&peer));
            debug!(ufrag = %peer.ufrag, "loopback connection created");
            Ok(peer as Arc<dyn PeerConnection>)
        })
    }
}

struct PeerInner {
    signaling: SignalingState,
    ice: IceConnectionState,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    remote_ufrag: Option<String>,
    pending_candidates: Vec<IceCandidate>,
    matched_candidates: usize,
    gathered: bool,
    linked: bool,
    closed: bool,
    channels: Vec<Arc<LoopbackChannel>>,
}

impl Default for PeerInner {
    fn default() -> Self {
        Self {
            signaling: SignalingState::Stable,
            ice: IceConnectionState::New,
            local: None,
            remote: None,
            remote_ufrag: None,
            pending_candidates: Vec::new(),
            matched_candidates: 0,
            gathered: false,
            linked: false,
            closed: false,
            channels: Vec::new(),
        }
    }
}

struct LoopbackPeer {
    network: Arc<NetworkShared>,
    ufrag: String,
    pwd: String,
    session_id: u64,
    config: RtcConfig,
    events: mpsc::UnboundedSender<RtcEvent>,
    state: Mutex<PeerInner>,
}

impl LoopbackPeer {
    fn emit(&self, event: RtcEvent) {
        // The owner may already have dropped its queue during teardown.
        let _ = self.events.send(event);
    }

    fn description(&self, sdp_type: SdpType) -> SessionDescription {
        SessionDescription {
            sdp: build_sdp(self.session_id, &self.ufrag, &self.pwd, sdp_type),
            sdp_type,
        }
    }

    fn gather_candidates(&self) -> Vec<IceCandidate> {
        let mut rng = rand::thread_rng();
        let port: u16 = rng.gen_range(49152..=65535);
        let mut lines = vec![format!(
            "candidate:1 1 udp 2122260223 127.0.0.1 {port} typ host generation 0"
        )];
        if self.config.ice_servers.iter().any(|s| !s.is_relay()) {
            lines.push(format!(
                "candidate:2 1 udp 1686052607 203.0.113.{} {port} typ srflx raddr 127.0.0.1 rport {port}",
                rng.gen_range(1..=254)
            ));
        }
        if self.config.ice_servers.iter().any(|s| s.is_relay()) {
            let relay_port: u16 = rng.gen_range(49152..=65535);
            lines.push(format!(
                "candidate:3 1 udp 41885439 198.51.100.{} {relay_port} typ relay raddr 203.0.113.1 rport {port}",
                rng.gen_range(1..=254)
            ));
        }
        lines
            .into_iter()
            .map(|candidate| IceCandidate {
                candidate,
                sdp_mid: Some("0".into()),
                sdp_m_line_index: Some(0),
                username_fragment: Some(self.ufrag.clone()),
            })
            .collect()
    }

    /// Counts a candidate if it belongs to the current remote session.
    fn accept_candidate(inner: &mut PeerInner, candidate: &IceCandidate) -> bool {
        match (&candidate.username_fragment, &inner.remote_ufrag) {
            (Some(fragment), Some(remote)) if fragment != remote => {
                debug!(fragment = %fragment, expected = %remote, "ignoring candidate for another session");
                false
            }
            _ => {
                inner.matched_candidates += 1;
                true
            }
        }
    }

    fn check_connected(&self) {
        let remote = {
            let mut inner = lock(&self.state);
            let ready = !inner.closed
                && inner.local.is_some()
                && inner.remote_ufrag.is_some()
                && inner.matched_candidates > 0;
            if !ready || inner.linked {
                return;
            }
            if inner.ice != IceConnectionState::Connected {
                inner.ice = IceConnectionState::Connected;
                self.emit(RtcEvent::IceStateChanged(IceConnectionState::Connected));
            }
            inner.remote_ufrag.clone()
        };
        if let Some(remote) = remote {
            self.network.try_link(&self.ufrag, &remote);
        }
    }

    fn ready_to_link(&self, remote_ufrag: &str) -> bool {
        let inner = lock(&self.state);
        !inner.closed
            && !inner.linked
            && inner.ice == IceConnectionState::Connected
            && inner.remote_ufrag.as_deref() == Some(remote_ufrag)
    }

    fn mark_linked(&self) {
        lock(&self.state).linked = true;
    }

    fn unpaired_channels(&self) -> Vec<Arc<LoopbackChannel>> {
        lock(&self.state)
            .channels
            .iter()
            .filter(|c| !c.is_paired())
            .cloned()
            .collect()
    }

    /// Creates the local end of a channel the peer opened.
    fn accept_channel(&self, remote: &Arc<LoopbackChannel>) -> Arc<LoopbackChannel> {
        let local = LoopbackChannel::new(&remote.label, self.events.clone());
        LoopbackChannel::pair(remote, &local);
        lock(&self.state).channels.push(Arc::clone(&local));
        self.emit(RtcEvent::DataChannel(Arc::clone(&local) as Arc<dyn DataChannel>));
        local
    }
}

impl PeerConnection for LoopbackPeer {
    fn create_offer(&self) -> RtcFuture<'_, SessionDescription> {
        Box::pin(async move {
            let inner = lock(&self.state);
            match inner.signaling {
                SignalingState::Stable | SignalingState::HaveLocalOffer => {
                    Ok(self.description(SdpType::Offer))
                }
                other => Err(RtcError::InvalidState(other.to_string())),
            }
        })
    }

    fn create_answer(&self) -> RtcFuture<'_, SessionDescription> {
        Box::pin(async move {
            let inner = lock(&self.state);
            match inner.signaling {
                SignalingState::HaveRemoteOffer => Ok(self.description(SdpType::Answer)),
                other => Err(RtcError::InvalidState(other.to_string())),
            }
        })
    }

    fn set_local_description(&self, description: SessionDescription) -> RtcFuture<'_, ()> {
        Box::pin(async move {
            let candidates = {
                let mut inner = lock(&self.state);
                if inner.closed {
                    return Err(RtcError::Closed);
                }
                if extract_ufrag(&description.sdp)? != self.ufrag {
                    return Err(RtcError::InvalidDescription(
                        "local description from another connection".into(),
                    ));
                }
                inner.signaling = match (inner.signaling, description.sdp_type) {
                    (SignalingState::Stable | SignalingState::HaveLocalOffer, SdpType::Offer) => {
                        SignalingState::HaveLocalOffer
                    }
                    (SignalingState::HaveRemoteOffer, SdpType::Answer) => SignalingState::Stable,
                    (state, _) => return Err(RtcError::InvalidState(state.to_string())),
                };
                inner.local = Some(description);
                if inner.gathered {
                    Vec::new()
                } else {
                    inner.gathered = true;
                    self.gather_candidates()
                }
            };
            for candidate in candidates {
                trace!(ufrag = %self.ufrag, candidate = %candidate.candidate, "local candidate");
                self.emit(RtcEvent::LocalCandidate(candidate));
            }
            self.check_connected();
            Ok(())
        })
    }

    fn set_remote_description(&self, description: SessionDescription) -> RtcFuture<'_, ()> {
        Box::pin(async move {
            {
                let mut inner = lock(&self.state);
                if inner.closed {
                    return Err(RtcError::Closed);
                }
                let remote_ufrag = extract_ufrag(&description.sdp)?;
                inner.signaling = match (inner.signaling, description.sdp_type) {
                    (SignalingState::Stable, SdpType::Offer) => SignalingState::HaveRemoteOffer,
                    (SignalingState::HaveLocalOffer, SdpType::Answer) => SignalingState::Stable,
                    (state, _) => return Err(RtcError::InvalidState(state.to_string())),
                };
                inner.remote = Some(description);
                inner.remote_ufrag = Some(remote_ufrag);
                inner.ice = IceConnectionState::Checking;
                self.emit(RtcEvent::IceStateChanged(IceConnectionState::Checking));

                let pending = std::mem::take(&mut inner.pending_candidates);
                for candidate in &pending {
                    Self::accept_candidate(&mut inner, candidate);
                }
            }
            self.check_connected();
            Ok(())
        })
    }

    fn add_ice_candidate(&self, candidate: IceCandidate) -> RtcFuture<'_, ()> {
        Box::pin(async move {
            {
                let mut inner = lock(&self.state);
                if inner.closed {
                    return Err(RtcError::Closed);
                }
                if !candidate.candidate.starts_with("candidate:") {
                    return Err(RtcError::InvalidDescription(format!(
                        "malformed candidate: {}",
                        candidate.candidate
                    )));
                }
                if inner.remote_ufrag.is_none() {
                    trace!(ufrag = %self.ufrag, "queueing candidate until remote description");
                    inner.pending_candidates.push(candidate);
                    return Ok(());
                }
                if !Self::accept_candidate(&mut inner, &candidate) {
                    return Ok(());
                }
            }
            self.check_connected();
            Ok(())
        })
    }

    fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, RtcError> {
        let channel = LoopbackChannel::new(label, self.events.clone());
        let remote_ufrag = {
            let mut inner = lock(&self.state);
            if inner.closed {
                return Err(RtcError::Closed);
            }
            inner.channels.push(Arc::clone(&channel));
            if inner.linked {
                inner.remote_ufrag.clone()
            } else {
                None
            }
        };
        if let Some(remote) = remote_ufrag.and_then(|u| self.network.peer(&u)) {
            let peer_end = remote.accept_channel(&channel);
            peer_end.open();
            channel.open();
        }
        Ok(channel as Arc<dyn DataChannel>)
    }

    fn signaling_state(&self) -> SignalingState {
        lock(&self.state).signaling
    }

    fn has_remote_description(&self) -> bool {
        lock(&self.state).remote.is_some()
    }

    fn close(&self) {
        let (channels, remote_ufrag) = {
            let mut inner = lock(&self.state);
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.signaling = SignalingState::Closed;
            inner.ice = IceConnectionState::Closed;
            let remote = if inner.linked {
                inner.remote_ufrag.clone()
            } else {
                None
            };
            (std::mem::take(&mut inner.channels), remote)
        };
        for channel in channels {
            channel.close();
        }
        lock(&self.network.peers).remove(&self.ufrag);
        if let Some(remote) = remote_ufrag.and_then(|u| self.network.peer(&u)) {
            remote.emit(RtcEvent::IceStateChanged(IceConnectionState::Disconnected));
        }
        debug!(ufrag = %self.ufrag, "loopback connection closed");
    }
}

struct LoopbackChannel {
    label: String,
    events: mpsc::UnboundedSender<RtcEvent>,
    state: Mutex<ReadyState>,
    remote: Mutex<Weak<LoopbackChannel>>,
}

impl LoopbackChannel {
    fn new(label: &str, events: mpsc::UnboundedSender<RtcEvent>) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            events,
            state: Mutex::new(ReadyState::Connecting),
            remote: Mutex::new(Weak::new()),
        })
    }

    fn pair(a: &Arc<Self>, b: &Arc<Self>) {
        *lock(&a.remote) = Arc::downgrade(b);
        *lock(&b.remote) = Arc::downgrade(a);
    }

    fn is_paired(&self) -> bool {
        lock(&self.remote).strong_count() > 0
    }

    fn open(&self) {
        {
            let mut state = lock(&self.state);
            if *state != ReadyState::Connecting {
                return;
            }
            *state = ReadyState::Open;
        }
        let _ = self.events.send(RtcEvent::ChannelOpen {
            label: self.label.clone(),
        });
    }

    fn deliver(&self, message: ChannelMessage) -> bool {
        if *lock(&self.state) != ReadyState::Open {
            return false;
        }
        self.events
            .send(RtcEvent::ChannelMessage {
                label: self.label.clone(),
                message,
            })
            .is_ok()
    }

    /// Marks this end closed. Returns `false` if it already was.
    fn shut(&self) -> bool {
        {
            let mut state = lock(&self.state);
            if *state == ReadyState::Closed {
                return false;
            }
            *state = ReadyState::Closed;
        }
        let _ = self.events.send(RtcEvent::ChannelClosed {
            label: self.label.clone(),
        });
        true
    }
}

impl DataChannel for LoopbackChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn ready_state(&self) -> ReadyState {
        *lock(&self.state)
    }

    fn send(&self, message: ChannelMessage) -> Result<(), RtcError> {
        if self.ready_state() != ReadyState::Open {
            return Err(RtcError::ChannelNotOpen(self.label.clone()));
        }
        if message.len() > MAX_MESSAGE_SIZE {
            return Err(RtcError::MessageTooLarge {
                size: message.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        let remote = lock(&self.remote).upgrade();
        match remote {
            Some(remote) if remote.deliver(message) => Ok(()),
            _ => Err(RtcError::Closed),
        }
    }

    fn buffered_amount(&self) -> usize {
        // Delivery is immediate.
        0
    }

    fn close(&self) {
        if self.shut() {
            let remote = lock(&self.remote).upgrade();
            if let Some(remote) = remote {
                remote.shut();
            }
        }
    }
}
