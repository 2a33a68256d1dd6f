//! One live peer session: its resources and the task driving it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Notify, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use printlink_data_channel::{
    DataChannel, IceConnectionState, PeerConnection, RtcEvent, SignalingState,
};
use printlink_protocol::{
    ChannelMessage, DATA_CHANNEL_LABEL, IceCandidate, Role, SessionDescription,
};
use printlink_signaling::SignalingExchange;
use printlink_store::Subscription;
use printlink_transfer::{ChunkedSender, PushOutcome, Reassembler, TransferError};

use crate::error::PeerError;
use crate::manager::{FileReceived, ProgressFn};
use crate::state::{PeerState, StateInput, next_state};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything a session holds that must be released on teardown.
pub(crate) struct SessionResources {
    pub(crate) job_id: String,
    pub(crate) role: Role,
    pub(crate) connection: Arc<dyn PeerConnection>,
    channel: Mutex<Option<Arc<dyn DataChannel>>>,
    subscriptions: Mutex<Vec<Subscription>>,
    pub(crate) cancel: CancellationToken,
    released: AtomicBool,
    bytes_transferred: AtomicU64,
    state: Arc<watch::Sender<PeerState>>,
    /// Serializes state writes against release.
    state_lock: Mutex<()>,
}

impl SessionResources {
    pub(crate) fn new(
        job_id: &str,
        role: Role,
        connection: Arc<dyn PeerConnection>,
        state: Arc<watch::Sender<PeerState>>,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            role,
            connection,
            channel: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            released: AtomicBool::new(false),
            bytes_transferred: AtomicU64::new(0),
            state,
            state_lock: Mutex::new(()),
        }
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub(crate) fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred.load(Ordering::Relaxed)
    }

    fn record_bytes(&self, bytes: u64) {
        self.bytes_transferred.store(bytes, Ordering::Relaxed);
    }

    pub(crate) fn set_channel(&self, channel: Arc<dyn DataChannel>) {
        *lock(&self.channel) = Some(channel);
    }

    fn channel(&self) -> Option<Arc<dyn DataChannel>> {
        lock(&self.channel).clone()
    }

    /// Keeps a subscription until release. Released sessions drop it at once.
    pub(crate) fn hold(&self, mut subscription: Subscription) {
        if self.is_released() {
            subscription.unsubscribe();
            return;
        }
        lock(&self.subscriptions).push(subscription);
    }

    /// Applies a state input unless the session was already released.
    pub(crate) fn apply(&self, input: StateInput) -> bool {
        let _guard = lock(&self.state_lock);
        if self.is_released() {
            return false;
        }
        let current = self.state.borrow().clone();
        match next_state(&current, &input) {
            Some(next) => {
                debug!(job = %self.job_id, role = ?self.role, from = %current, to = %next, "peer state");
                self.state.send_replace(next);
                true
            }
            None => {
                debug!(job = %self.job_id, state = %current, ?input, "input ignored");
                false
            }
        }
    }

    /// Whether an incoming remote description may be applied now.
    pub(crate) fn can_apply_remote(&self) -> bool {
        !self.is_released()
            && *self.state.borrow() == PeerState::Negotiating
            && self.connection.signaling_state() == SignalingState::HaveLocalOffer
            && !self.connection.has_remote_description()
    }

    /// Releases subscriptions, channel and connection.
    ///
    /// Only the first call does anything; it returns `true`.
    pub(crate) fn release(&self) -> bool {
        {
            let _guard = lock(&self.state_lock);
            if self.released.swap(true, Ordering::SeqCst) {
                return false;
            }
        }
        self.cancel.cancel();
        let subscriptions = std::mem::take(&mut *lock(&self.subscriptions));
        let count = subscriptions.len();
        for mut subscription in subscriptions {
            subscription.unsubscribe();
        }
        if let Some(channel) = lock(&self.channel).take() {
            channel.close();
        }
        self.connection.close();
        debug!(job = %self.job_id, role = ?self.role, subscriptions = count, "session resources released");
        true
    }
}

/// Work queued for the driver by signaling callbacks and helper tasks.
pub(crate) enum SessionCommand {
    RemoteDescription(SessionDescription),
    RemoteCandidate(IceCandidate),
    SendFinished(Result<u64, TransferError>),
}

/// Role-specific driver state.
pub(crate) enum RoleState {
    Offerer {
        reassembler: Reassembler,
        on_file_received: Option<FileReceived>,
    },
    Answerer {
        payload: Option<(Vec<u8>, ProgressFn)>,
        ready: Option<Arc<Notify>>,
        send_done: bool,
        channel_closed: bool,
    },
}

impl RoleState {
    pub(crate) fn offerer(
        job_id: &str,
        expected_bytes: Option<u64>,
        on_file_received: FileReceived,
    ) -> Self {
        let reassembler = Reassembler::new(job_id);
        RoleState::Offerer {
            reassembler: match expected_bytes {
                Some(total) => reassembler.with_expected_size(total),
                None => reassembler,
            },
            on_file_received: Some(on_file_received),
        }
    }

    pub(crate) fn answerer(blob: Vec<u8>, on_progress: ProgressFn) -> Self {
        RoleState::Answerer {
            payload: Some((blob, on_progress)),
            ready: None,
            send_done: false,
            channel_closed: false,
        }
    }
}

/// Applies session events one at a time.
pub(crate) struct SessionDriver {
    resources: Arc<SessionResources>,
    signaling: SignalingExchange,
    rtc_events: mpsc::UnboundedReceiver<RtcEvent>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    role: RoleState,
}

impl SessionDriver {
    pub(crate) fn new(
        resources: Arc<SessionResources>,
        signaling: SignalingExchange,
        rtc_events: mpsc::UnboundedReceiver<RtcEvent>,
        commands: mpsc::UnboundedReceiver<SessionCommand>,
        command_tx: mpsc::UnboundedSender<SessionCommand>,
        role: RoleState,
    ) -> Self {
        Self {
            resources,
            signaling,
            rtc_events,
            commands,
            command_tx,
            role,
        }
    }

    pub(crate) async fn run(mut self) {
        let cancel = self.resources.cancel.clone();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(command) = self.commands.recv() => self.on_command(command).await,
                Some(event) = self.rtc_events.recv() => self.on_rtc_event(event).await,
                else => break,
            }
            if self.resources.is_released() {
                break;
            }
        }
        debug!(job = %self.resources.job_id, role = ?self.resources.role, "session driver stopped");
    }

    async fn on_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::RemoteDescription(description) => {
                self.on_remote_description(description).await
            }
            SessionCommand::RemoteCandidate(candidate) => {
                if let Err(e) = self.resources.connection.add_ice_candidate(candidate).await {
                    debug!(job = %self.resources.job_id, error = %e, "remote candidate rejected");
                }
            }
            SessionCommand::SendFinished(result) => self.on_send_finished(result),
        }
    }

    async fn on_remote_description(&mut self, description: SessionDescription) {
        if !self.resources.can_apply_remote() {
            debug!(job = %self.resources.job_id, "remote description arrived too late, ignoring");
            return;
        }
        match self
            .resources
            .connection
            .set_remote_description(description)
            .await
        {
            Ok(()) => {
                info!(job = %self.resources.job_id, "remote description applied");
                self.resources.apply(StateInput::RemoteDescriptionApplied);
            }
            Err(e) => self.fail(PeerError::NegotiationRejected(e.to_string())),
        }
    }

    async fn on_rtc_event(&mut self, event: RtcEvent) {
        match event {
            RtcEvent::LocalCandidate(candidate) => {
                let res = &self.resources;
                if let Err(e) = self
                    .signaling
                    .publish_local_candidate(&res.job_id, res.role, &candidate)
                    .await
                {
                    warn!(job = %res.job_id, error = %e, "failed to publish local candidate");
                }
            }
            RtcEvent::IceStateChanged(state) => {
                debug!(job = %self.resources.job_id, ?state, "ice state");
                if state == IceConnectionState::Failed {
                    self.fail(PeerError::NegotiationRejected("network path failed".into()));
                }
            }
            RtcEvent::DataChannel(channel) => {
                if channel.label() == DATA_CHANNEL_LABEL {
                    debug!(job = %self.resources.job_id, "peer opened the file channel");
                    self.resources.set_channel(channel);
                } else {
                    warn!(job = %self.resources.job_id, label = channel.label(), "closing unexpected channel");
                    channel.close();
                }
            }
            RtcEvent::ChannelOpen { label } => self.on_channel_open(&label),
            RtcEvent::ChannelMessage { message, .. } => self.on_message(message),
            RtcEvent::ChannelClosed { label } => self.on_channel_closed(&label),
            RtcEvent::BufferedAmountLow { .. } => {
                if let RoleState::Answerer {
                    ready: Some(ready), ..
                } = &self.role
                {
                    ready.notify_one();
                }
            }
        }
    }

    fn on_channel_open(&mut self, label: &str) {
        if label != DATA_CHANNEL_LABEL {
            return;
        }
        info!(job = %self.resources.job_id, role = ?self.resources.role, "data channel open");
        self.resources.apply(StateInput::ChannelOpened);

        let RoleState::Answerer { payload, ready, .. } = &mut self.role else {
            return;
        };
        if let Some(ready) = ready.as_ref() {
            ready.notify_one();
            return;
        }
        let (Some((blob, mut on_progress)), Some(channel)) = (payload.take(), self.resources.channel())
        else {
            return;
        };

        let sender = ChunkedSender::new(self.resources.job_id.clone(), channel, blob);
        *ready = Some(sender.ready_signal());
        let cancel = self.resources.cancel.child_token();
        let resources = Arc::clone(&self.resources);
        let done = self.command_tx.clone();
        tokio::spawn(async move {
            let result = sender
                .run(
                    move |progress| {
                        resources.record_bytes(progress.bytes_transferred);
                        on_progress(progress);
                    },
                    cancel,
                )
                .await;
            let _ = done.send(SessionCommand::SendFinished(result));
        });
    }

    fn on_message(&mut self, message: ChannelMessage) {
        let RoleState::Offerer {
            reassembler,
            on_file_received,
        } = &mut self.role
        else {
            debug!(job = %self.resources.job_id, "answerer ignores inbound message");
            return;
        };
        match reassembler.push(message) {
            PushOutcome::Buffered => {
                let progress = reassembler.progress();
                trace!(job = %progress.job_id, percent = progress.percentage(), "frame received");
                self.resources.record_bytes(progress.bytes_transferred);
            }
            PushOutcome::Ignored => {}
            PushOutcome::SizeMismatch { expected, actual } => {
                self.fail(PeerError::from(TransferError::SizeMismatch { expected, actual }));
            }
            PushOutcome::Complete(blob) => {
                info!(job = %self.resources.job_id, bytes = blob.len(), "file received");
                self.resources.record_bytes(blob.len() as u64);
                self.resources.apply(StateInput::TransferFinished);
                if let Some(callback) = on_file_received.take() {
                    callback(Ok(blob));
                }
                self.resources.release();
            }
        }
    }

    fn on_channel_closed(&mut self, label: &str) {
        if label != DATA_CHANNEL_LABEL {
            return;
        }
        match &mut self.role {
            RoleState::Offerer { reassembler, .. } => {
                if let Err(e) = reassembler.on_channel_closed() {
                    self.fail(PeerError::from(e));
                }
            }
            RoleState::Answerer {
                send_done,
                channel_closed,
                ..
            } => {
                *channel_closed = true;
                if *send_done {
                    self.finish();
                }
            }
        }
    }

    fn on_send_finished(&mut self, result: Result<u64, TransferError>) {
        let RoleState::Answerer {
            send_done,
            channel_closed,
            ..
        } = &mut self.role
        else {
            return;
        };
        match result {
            Ok(bytes) => {
                info!(job = %self.resources.job_id, bytes, "file sent");
                *send_done = true;
                if *channel_closed {
                    self.finish();
                }
            }
            Err(e) => self.fail(PeerError::from(e)),
        }
    }

    fn finish(&self) {
        self.resources.apply(StateInput::TransferFinished);
        self.resources.release();
    }

    /// Fails the session. A pending receive callback learns why.
    fn fail(&mut self, error: PeerError) {
        warn!(job = %self.resources.job_id, role = ?self.resources.role, error = %error, "peer session failed");
        if let RoleState::Offerer {
            on_file_received, ..
        } = &mut self.role
        {
            if let Some(callback) = on_file_received.take() {
                callback(Err(error.clone()));
            }
        }
        self.resources.apply(StateInput::Failure(error.to_string()));
        self.resources.release();
    }
}
