//! The public face of a peer session.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use printlink_data_channel::{PeerConnection, PeerConnector, RtcConfig};
use printlink_protocol::{
    DATA_CHANNEL_LABEL, IceCandidate, Role, SessionDescription, TransferProgress,
};
use printlink_signaling::SignalingExchange;

use crate::error::PeerError;
use crate::session::{RoleState, SessionCommand, SessionDriver, SessionResources};
use crate::state::{PeerState, StateInput};

/// Called once with the reconstructed blob, or with the reason it never arrived.
pub type FileReceived = Box<dyn FnOnce(Result<Vec<u8>, PeerError>) + Send>;

/// Called after every frame the answerer sends.
pub type ProgressFn = Box<dyn FnMut(TransferProgress) + Send>;

struct ActiveSession {
    resources: Arc<SessionResources>,
    commands: mpsc::UnboundedSender<SessionCommand>,
}

/// Owns the single live peer session of this process.
///
/// Creating a session always tears down the previous one first.
pub struct PeerConnectionManager {
    signaling: SignalingExchange,
    connector: Arc<dyn PeerConnector>,
    config: RtcConfig,
    session: Mutex<Option<ActiveSession>>,
    state: Arc<watch::Sender<PeerState>>,
}

impl PeerConnectionManager {
    pub fn new(
        signaling: SignalingExchange,
        connector: Arc<dyn PeerConnector>,
        config: RtcConfig,
    ) -> Self {
        let (state, _) = watch::channel(PeerState::New);
        Self {
            signaling,
            connector,
            config,
            session: Mutex::new(None),
            state: Arc::new(state),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current session state.
    pub fn state(&self) -> PeerState {
        self.state.borrow().clone()
    }

    /// Subscribes to session state changes.
    pub fn watch_state(&self) -> watch::Receiver<PeerState> {
        self.state.subscribe()
    }

    /// Job of the live session, if any.
    pub fn active_job(&self) -> Option<String> {
        self.slot()
            .as_ref()
            .filter(|s| !s.resources.is_released())
            .map(|s| s.resources.job_id.clone())
    }

    /// Payload bytes moved by the current (or last) session.
    pub fn bytes_transferred(&self) -> u64 {
        self.slot()
            .as_ref()
            .map(|s| s.resources.bytes_transferred())
            .unwrap_or(0)
    }

    /// Starts a receiving session for `job_id` as the offerer.
    ///
    /// Returns once the offer is published; negotiation and the transfer
    /// continue in the background. `on_file_received` runs exactly once
    /// with the blob, or with the error that ended the session first (such
    /// as the channel closing before the end-of-transfer marker). It does
    /// not run after an explicit [`teardown`](Self::teardown).
    ///
    /// With `expected_bytes` set, a blob of any other size ends the session
    /// as a failure.
    pub async fn create_outbound_offer<F>(
        &self,
        job_id: &str,
        expected_bytes: Option<u64>,
        on_file_received: F,
    ) -> Result<(), PeerError>
    where
        F: FnOnce(Result<Vec<u8>, PeerError>) + Send + 'static,
    {
        self.teardown();
        info!(job = %job_id, "creating outbound offer");

        let (rtc_tx, rtc_rx) = mpsc::unbounded_channel();
        let connection = self.connect(rtc_tx).await?;
        let (resources, commands_tx, commands_rx) =
            self.install(job_id, Role::Offerer, connection);

        if let Err(e) = self.negotiate_offer(&resources, &commands_tx).await {
            self.abort(&resources, &e);
            return Err(e);
        }

        let driver = SessionDriver::new(
            resources,
            self.signaling.clone(),
            rtc_rx,
            commands_rx,
            commands_tx,
            RoleState::offerer(job_id, expected_bytes, Box::new(on_file_received)),
        );
        tokio::spawn(driver.run());
        Ok(())
    }

    /// Starts a sending session for `job_id` as the answerer.
    ///
    /// Fails with [`PeerError::NoOfferFound`] before creating any
    /// connection if the job carries no offer. The blob starts flowing
    /// when the data channel opens; `on_progress` runs after every frame.
    pub async fn create_inbound_answer<P>(
        &self,
        job_id: &str,
        blob: Vec<u8>,
        on_progress: P,
    ) -> Result<(), PeerError>
    where
        P: FnMut(TransferProgress) + Send + 'static,
    {
        self.teardown();
        info!(job = %job_id, bytes = blob.len(), "creating inbound answer");

        let offer = self.signaling.fetch_remote_offer(job_id).await?;

        let (rtc_tx, rtc_rx) = mpsc::unbounded_channel();
        let connection = self.connect(rtc_tx).await?;
        let (resources, commands_tx, commands_rx) =
            self.install(job_id, Role::Answerer, connection);

        if let Err(e) = self.negotiate_answer(&resources, &commands_tx, offer).await {
            self.abort(&resources, &e);
            return Err(e);
        }

        let driver = SessionDriver::new(
            resources,
            self.signaling.clone(),
            rtc_rx,
            commands_rx,
            commands_tx,
            RoleState::answerer(blob, Box::new(on_progress)),
        );
        tokio::spawn(driver.run());
        Ok(())
    }

    /// Feeds a peer candidate obtained out of band into the live session.
    pub fn apply_remote_candidate(
        &self,
        job_id: &str,
        candidate: IceCandidate,
    ) -> Result<(), PeerError> {
        let slot = self.slot();
        let session = slot
            .as_ref()
            .filter(|s| s.resources.job_id == job_id && !s.resources.is_released())
            .ok_or(PeerError::NoActiveSession)?;
        session
            .commands
            .send(SessionCommand::RemoteCandidate(candidate))
            .map_err(|_| PeerError::SessionClosed)
    }

    /// Releases the live session, if any. Safe to call at any time.
    pub fn teardown(&self) {
        let Some(session) = self.slot().take() else {
            return;
        };
        let released = session.resources.release();
        self.state.send_replace(PeerState::Closed);
        info!(job = %session.resources.job_id, released, "peer session torn down");
    }

    async fn connect(
        &self,
        events: mpsc::UnboundedSender<printlink_data_channel::RtcEvent>,
    ) -> Result<Arc<dyn PeerConnection>, PeerError> {
        self.connector
            .connect(&self.config, events)
            .await
            .map_err(|e| {
                let error = PeerError::from(e);
                self.state.send_replace(PeerState::Failed {
                    reason: error.to_string(),
                });
                error
            })
    }

    fn install(
        &self,
        job_id: &str,
        role: Role,
        connection: Arc<dyn PeerConnection>,
    ) -> (
        Arc<SessionResources>,
        mpsc::UnboundedSender<SessionCommand>,
        mpsc::UnboundedReceiver<SessionCommand>,
    ) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let resources = Arc::new(SessionResources::new(
            job_id,
            role,
            connection,
            Arc::clone(&self.state),
        ));
        self.state.send_replace(PeerState::New);
        // A session created concurrently since our teardown is replaced too.
        if let Some(previous) = self.slot().replace(ActiveSession {
            resources: Arc::clone(&resources),
            commands: commands_tx.clone(),
        }) {
            previous.resources.release();
        }
        (resources, commands_tx, commands_rx)
    }

    fn abort(&self, resources: &Arc<SessionResources>, error: &PeerError) {
        warn!(job = %resources.job_id, role = ?resources.role, error = %error, "session setup failed");
        resources.apply(StateInput::Failure(error.to_string()));
        resources.release();
        let mut slot = self.slot();
        if slot
            .as_ref()
            .is_some_and(|s| Arc::ptr_eq(&s.resources, resources))
        {
            *slot = None;
        }
    }

    fn ensure_live(resources: &SessionResources) -> Result<(), PeerError> {
        if resources.is_released() {
            Err(PeerError::SessionClosed)
        } else {
            Ok(())
        }
    }

    async fn negotiate_offer(
        &self,
        resources: &Arc<SessionResources>,
        commands: &mpsc::UnboundedSender<SessionCommand>,
    ) -> Result<(), PeerError> {
        let job_id = resources.job_id.as_str();
        let connection = &resources.connection;

        let offer = connection.create_offer().await?;
        connection.set_local_description(offer.clone()).await?;
        self.signaling
            .publish_local_description(job_id, &offer)
            .await?;
        Self::ensure_live(resources)?;
        resources.apply(StateInput::LocalDescriptionPublished);

        let gate = Arc::clone(resources);
        let tx = commands.clone();
        let subscription = self.signaling.subscribe_remote_description(
            job_id,
            Role::Offerer,
            move || gate.can_apply_remote(),
            move |answer| {
                let _ = tx.send(SessionCommand::RemoteDescription(answer));
            },
        )?;
        resources.hold(subscription);

        self.watch_candidates(resources, commands)
    }

    async fn negotiate_answer(
        &self,
        resources: &Arc<SessionResources>,
        commands: &mpsc::UnboundedSender<SessionCommand>,
        offer: SessionDescription,
    ) -> Result<(), PeerError> {
        let job_id = resources.job_id.as_str();
        let connection = &resources.connection;

        let channel = connection.create_data_channel(DATA_CHANNEL_LABEL)?;
        resources.set_channel(channel);

        connection
            .set_remote_description(offer)
            .await
            .map_err(|e| PeerError::NegotiationRejected(e.to_string()))?;
        let answer = connection.create_answer().await?;
        connection.set_local_description(answer.clone()).await?;
        self.signaling
            .publish_local_description(job_id, &answer)
            .await?;
        Self::ensure_live(resources)?;
        resources.apply(StateInput::LocalDescriptionPublished);
        resources.apply(StateInput::RemoteDescriptionApplied);

        self.watch_candidates(resources, commands)
    }

    fn watch_candidates(
        &self,
        resources: &Arc<SessionResources>,
        commands: &mpsc::UnboundedSender<SessionCommand>,
    ) -> Result<(), PeerError> {
        let tx = commands.clone();
        let subscription = self.signaling.subscribe_remote_candidates(
            &resources.job_id,
            resources.role,
            move |candidate| {
                let _ = tx.send(SessionCommand::RemoteCandidate(candidate));
            },
        )?;
        resources.hold(subscription);
        Ok(())
    }
}

impl Drop for PeerConnectionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}
