//! The receiving side: accepts jobs, receives their files, prices and prints.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use printlink_peer_connection::{PeerConnectionManager, PeerError, PeerState};
use printlink_protocol::{FileMetadata, JobRecord, JobStatus};
use printlink_signaling::SignalingExchange;
use printlink_store::{DocumentStore, ObjectRef, ObjectStore};
use printlink_transfer::split_bundle;

use crate::error::JobError;
use crate::events::JobEvent;
use crate::lifecycle::{StatusEvent, Transition};
use crate::pricing::{PerCopyPricing, PricingPolicy};
use crate::repository::JobRepository;
use crate::surface::PrintSurface;

/// Reason prefix of failures before the payload arrived intact.
pub(crate) const TRANSFER_FAILURE: &str = "transfer:";
/// Reason prefix of failures while printing a received payload.
pub(crate) const RENDER_FAILURE: &str = "render:";

/// Agent-side work in flight for one accepted job.
#[derive(Default)]
struct JobWork {
    cancel: CancellationToken,
    staged: Vec<ObjectRef>,
}

/// Print agent coordinator.
///
/// The agent is the only writer of a job's status once it has been
/// accepted; its writes are serialized so that concurrent events cannot
/// interleave their read-modify-write cycles.
pub struct PrintAgent {
    inner: Arc<AgentInner>,
    events_rx: Option<mpsc::Receiver<JobEvent>>,
}

/// Builds a [`PrintAgent`].
pub struct PrintAgentBuilder {
    store: Arc<dyn DocumentStore>,
    peer: PeerConnectionManager,
    surface: Arc<dyn PrintSurface>,
    pricing: Box<dyn PricingPolicy>,
    objects: Option<Arc<dyn ObjectStore>>,
}

impl PrintAgentBuilder {
    pub fn pricing(mut self, pricing: impl PricingPolicy + 'static) -> Self {
        self.pricing = Box::new(pricing);
        self
    }

    /// Stages every received file at `jobs/{jobId}/{fileName}`.
    pub fn object_store(mut self, objects: Arc<dyn ObjectStore>) -> Self {
        self.objects = Some(objects);
        self
    }

    pub fn build(self) -> PrintAgent {
        let (events_tx, events_rx) = mpsc::channel(256);
        PrintAgent {
            inner: Arc::new(AgentInner {
                repo: JobRepository::new(Arc::clone(&self.store)),
                signaling: SignalingExchange::new(self.store),
                peer: self.peer,
                surface: self.surface,
                pricing: self.pricing,
                objects: self.objects,
                work: Mutex::new(HashMap::new()),
                status_writes: tokio::sync::Mutex::new(()),
                events_tx,
            }),
            events_rx: Some(events_rx),
        }
    }
}

struct AgentInner {
    repo: JobRepository,
    signaling: SignalingExchange,
    peer: PeerConnectionManager,
    surface: Arc<dyn PrintSurface>,
    pricing: Box<dyn PricingPolicy>,
    objects: Option<Arc<dyn ObjectStore>>,
    work: Mutex<HashMap<String, JobWork>>,
    status_writes: tokio::sync::Mutex<()>,
    events_tx: mpsc::Sender<JobEvent>,
}

impl PrintAgent {
    pub fn builder(
        store: Arc<dyn DocumentStore>,
        peer: PeerConnectionManager,
        surface: Arc<dyn PrintSurface>,
    ) -> PrintAgentBuilder {
        PrintAgentBuilder {
            store,
            peer,
            surface,
            pricing: Box::new(PerCopyPricing::default()),
            objects: None,
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<JobEvent>> {
        self.events_rx.take()
    }

    pub fn peer(&self) -> &PeerConnectionManager {
        &self.inner.peer
    }

    /// The merchant's jobs, newest first.
    pub async fn queue(&self, merchant_id: &str) -> Result<Vec<JobRecord>, JobError> {
        self.inner.repo.list_for_merchant(merchant_id).await
    }

    /// Accepts a pending (or failed) job and publishes an offer for it.
    ///
    /// Accepting a job that is already past `pending` does nothing.
    pub async fn accept_job(&self, job_id: &str) -> Result<(), JobError> {
        let inner = &self.inner;
        let job = inner.repo.require(job_id).await?;
        if job.status == JobStatus::Failed {
            // A retry starts from a clean negotiation.
            inner.signaling.reset_negotiation(job_id).await?;
        }
        if !inner.advance(job_id, StatusEvent::Accept).await? {
            debug!(job = %job_id, status = %job.status, "job already accepted");
            return Ok(());
        }

        // Only one session can be live; the job it served cannot finish now.
        if let Some(previous) = inner.peer.active_job().filter(|p| p != job_id) {
            inner.peer.teardown();
            inner
                .fail(&previous, format!("{TRANSFER_FAILURE} superseded by {job_id}"))
                .await;
        }

        let cancel = inner.begin_work(job_id);
        let expected = job
            .files
            .iter()
            .try_fold(0u64, |total, f| total.checked_add(f.size));
        let weak = Arc::downgrade(inner);
        let id = job_id.to_string();
        let offered = inner
            .peer
            .create_outbound_offer(job_id, expected, move |result| {
                if let Some(inner) = weak.upgrade() {
                    tokio::spawn(async move { inner.on_file_received(&id, cancel, result).await });
                }
            })
            .await;
        if let Err(e) = offered {
            inner.fail(job_id, format!("{TRANSFER_FAILURE} {e}")).await;
            return Err(e.into());
        }

        tokio::spawn(follow_session(Arc::downgrade(inner), job_id.to_string()));
        info!(job = %job_id, "job accepted, offer published");
        Ok(())
    }

    pub async fn confirm_payment(&self, job_id: &str) -> Result<(), JobError> {
        self.inner
            .advance(job_id, StatusEvent::PaymentConfirmed)
            .await
            .map(|_| ())
    }

    pub async fn complete_job(&self, job_id: &str) -> Result<(), JobError> {
        self.inner
            .advance(job_id, StatusEvent::Completed)
            .await
            .map(|_| ())
    }

    /// Deletes a job in any state, stopping its session, any printing in
    /// progress and removing its staged files.
    pub async fn delete_job(&self, job_id: &str) -> Result<(), JobError> {
        let inner = &self.inner;
        let staged = match inner.work().remove(job_id) {
            Some(work) => {
                work.cancel.cancel();
                work.staged
            }
            None => Vec::new(),
        };
        if inner.peer.active_job().as_deref() == Some(job_id) {
            inner.peer.teardown();
        }
        inner.discard(job_id, staged).await;

        let _guard = inner.status_writes.lock().await;
        inner.repo.delete(job_id).await
    }
}

/// Records `transferring` once the data channel of `job_id` opens.
async fn follow_session(inner: Weak<AgentInner>, job_id: String) {
    let Some(mut state) = inner.upgrade().map(|i| i.peer.watch_state()) else {
        return;
    };
    loop {
        let current = state.borrow_and_update().clone();
        let Some(agent) = inner.upgrade() else {
            return;
        };
        if agent.peer.active_job().as_deref() != Some(job_id.as_str()) || current.is_terminal() {
            return;
        }
        if current == PeerState::Transferring {
            if let Err(e) = agent.advance(&job_id, StatusEvent::ChannelOpened).await {
                debug!(job = %job_id, error = %e, "could not record transfer start");
            }
            return;
        }
        drop(agent);
        if state.changed().await.is_err() {
            return;
        }
    }
}

impl AgentInner {
    fn work(&self) -> MutexGuard<'_, HashMap<String, JobWork>> {
        self.work.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a new attempt at `job_id`, stopping any earlier one. Files
    /// staged by earlier attempts stay until the job is deleted.
    fn begin_work(&self, job_id: &str) -> CancellationToken {
        let mut work = self.work();
        let entry = work.entry(job_id.to_string()).or_default();
        entry.cancel.cancel();
        entry.cancel = CancellationToken::new();
        entry.cancel.clone()
    }

    async fn discard(&self, job_id: &str, staged: Vec<ObjectRef>) {
        let Some(objects) = &self.objects else {
            return;
        };
        for object in staged {
            if let Err(e) = objects.delete(&object).await {
                warn!(job = %job_id, path = %object.path, error = %e, "failed to delete staged file");
            }
        }
    }

    fn emit(&self, event: JobEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            debug!(error = %e, "job event dropped");
        }
    }

    /// Applies `event`; returns `true` if the status changed.
    async fn advance(&self, job_id: &str, event: StatusEvent) -> Result<bool, JobError> {
        let _guard = self.status_writes.lock().await;
        match self.repo.apply_event(job_id, event).await? {
            Transition::Advance(status) => {
                self.emit(JobEvent::StatusChanged {
                    job_id: job_id.to_string(),
                    status,
                });
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail(&self, job_id: &str, reason: String) {
        warn!(job = %job_id, reason = %reason, "job failed");
        match self
            .advance(job_id, StatusEvent::Fail { reason: reason.clone() })
            .await
        {
            Ok(true) => self.emit(JobEvent::Failed {
                job_id: job_id.to_string(),
                reason,
            }),
            Ok(false) => {}
            Err(JobError::NotFound(_)) => {
                debug!(job = %job_id, "job deleted before failure was recorded");
            }
            Err(e) => warn!(job = %job_id, error = %e, "could not record failure"),
        }
    }

    async fn on_file_received(
        &self,
        job_id: &str,
        cancel: CancellationToken,
        result: Result<Vec<u8>, PeerError>,
    ) {
        let blob = match result {
            Ok(blob) => blob,
            Err(e) => {
                self.fail(job_id, format!("{TRANSFER_FAILURE} {e}")).await;
                return;
            }
        };
        info!(job = %job_id, bytes = blob.len(), "payload received");

        match self.process(job_id, &cancel, blob).await {
            Ok(()) => {}
            Err(JobError::NotFound(_) | JobError::Deleted(_)) => {
                info!(job = %job_id, "job deleted, processing stopped");
            }
            Err(JobError::Render(e)) => self.fail(job_id, format!("{RENDER_FAILURE} {e}")).await,
            Err(e) => self.fail(job_id, format!("{TRANSFER_FAILURE} {e}")).await,
        }
    }

    async fn process(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
        blob: Vec<u8>,
    ) -> Result<(), JobError> {
        let stopped = || JobError::Deleted(job_id.to_string());

        // Usually recorded by `follow_session` already.
        self.advance(job_id, StatusEvent::ChannelOpened).await?;
        self.advance(job_id, StatusEvent::FileReceived).await?;

        let job = self.repo.require(job_id).await?;
        let documents = split_bundle(&blob, &job.files)?;
        for (file, document) in job.files.iter().zip(documents) {
            if cancel.is_cancelled() {
                return Err(stopped());
            }
            self.stage(job_id, cancel, file, &document).await?;
            let output = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(stopped()),
                printed = self.surface.print(&document, file) => printed?,
            };
            self.emit(JobEvent::FilePrinted {
                job_id: job_id.to_string(),
                name: file.name.clone(),
                output,
            });
        }
        if cancel.is_cancelled() {
            return Err(stopped());
        }

        let cost = self.pricing.price(&job.files);
        self.repo.set_cost(job_id, cost).await?;
        self.advance(job_id, StatusEvent::Priced).await?;
        info!(job = %job_id, cost, "job priced, awaiting payment");
        Ok(())
    }

    async fn stage(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
        file: &FileMetadata,
        document: &[u8],
    ) -> Result<(), JobError> {
        let Some(objects) = &self.objects else {
            return Ok(());
        };
        let path = format!("jobs/{job_id}/{}", file.name);
        let object = objects.upload(document.to_vec(), &path).await?;

        // Checked under the same lock `delete_job` cancels under.
        let orphan = {
            let mut work = self.work();
            match work.get_mut(job_id) {
                Some(entry) if !cancel.is_cancelled() => {
                    entry.staged.push(object);
                    None
                }
                _ => Some(object),
            }
        };
        match orphan {
            None => {
                debug!(job = %job_id, path = %path, "file staged");
                Ok(())
            }
            Some(object) => {
                self.discard(job_id, vec![object]).await;
                Err(JobError::Deleted(job_id.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use printlink_data_channel::{LoopbackNetwork, RtcConfig};
    use printlink_protocol::{PrintSpec, SdpType};
    use printlink_store::{MemoryObjectStore, MemoryStore};

    use super::*;
    use crate::client::{OutgoingFile, PrintClient};
    use crate::surface::{RenderError, RenderFuture, SpoolSurface};

    struct Harness {
        repo: JobRepository,
        objects: MemoryObjectStore,
        agent: PrintAgent,
        agent_events: mpsc::Receiver<JobEvent>,
        client: Arc<PrintClient>,
        _spool: tempfile::TempDir,
    }

    struct BrokenSurface;

    /// Holds every print until released and records which files started.
    #[derive(Default)]
    struct GatedSurface {
        started: Mutex<Vec<String>>,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    impl GatedSurface {
        fn started(&self) -> Vec<String> {
            self.started.lock().unwrap().clone()
        }
    }

    impl PrintSurface for GatedSurface {
        fn print<'a>(&'a self, _document: &'a [u8], file: &'a FileMetadata) -> RenderFuture<'a, PathBuf> {
            Box::pin(async move {
                self.started.lock().unwrap().push(file.name.clone());
                self.entered.notify_one();
                self.release.notified().await;
                Ok(PathBuf::from(&file.name))
            })
        }
    }

    impl PrintSurface for BrokenSurface {
        fn print<'a>(&'a self, _document: &'a [u8], file: &'a FileMetadata) -> RenderFuture<'a, PathBuf> {
            Box::pin(async move { Err(RenderError::UnsupportedContent(file.name.clone())) })
        }
    }

    fn harness(surface: Option<Arc<dyn PrintSurface>>) -> Harness {
        let store = MemoryStore::new();
        let net = LoopbackNetwork::new();
        let shared: Arc<dyn DocumentStore> = Arc::new(store.clone());
        let peer = || {
            PeerConnectionManager::new(
                SignalingExchange::new(Arc::clone(&shared)),
                Arc::new(net.clone()),
                RtcConfig::default(),
            )
        };
        let spool = tempfile::tempdir().unwrap();
        let surface = surface.unwrap_or_else(|| {
            Arc::new(SpoolSurface::new(spool.path().to_path_buf())) as Arc<dyn PrintSurface>
        });
        let objects = MemoryObjectStore::new();

        let mut agent = PrintAgent::builder(Arc::clone(&shared), peer(), surface)
            .object_store(Arc::new(objects.clone()))
            .build();
        let agent_events = agent.take_events().unwrap();
        let client = Arc::new(PrintClient::new(Arc::clone(&shared), peer()));

        Harness {
            repo: JobRepository::new(shared),
            objects,
            agent,
            agent_events,
            client,
            _spool: spool,
        }
    }

    fn file(name: &str, mime: &str, copies: u32, len: usize) -> OutgoingFile {
        OutgoingFile {
            name: name.into(),
            mime_type: Some(mime.into()),
            specs: PrintSpec {
                copies,
                ..PrintSpec::default()
            },
            contents: (0..len).map(|i| (i % 251) as u8).collect(),
        }
    }

    /// Collects agent events up to and including the given status.
    async fn events_until(
        events: &mut mpsc::Receiver<JobEvent>,
        done: impl Fn(&JobEvent) -> bool,
    ) -> Vec<JobEvent> {
        tokio::time::timeout(Duration::from_secs(5), async {
            let mut seen = Vec::new();
            while let Some(event) = events.recv().await {
                let stop = done(&event);
                seen.push(event);
                if stop {
                    break;
                }
            }
            seen
        })
        .await
        .expect("agent did not reach the expected state")
    }

    fn statuses(events: &[JobEvent]) -> Vec<JobStatus> {
        events
            .iter()
            .filter_map(|e| match e {
                JobEvent::StatusChanged { status, .. } => Some(*status),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn job_runs_from_submission_to_completion() {
        let mut h = harness(None);
        let job = h
            .client
            .submit(
                "m1",
                "u1",
                vec![
                    file("report.pdf", "application/pdf", 2, 40_000),
                    file("photo.png", "image/png", 3, 5_000),
                ],
            )
            .await
            .unwrap();
        assert_eq!(h.agent.queue("m1").await.unwrap().len(), 1);

        let (accepted, sent) =
            tokio::join!(h.agent.accept_job(&job.id), h.client.send_when_accepted(&job));
        accepted.unwrap();
        sent.unwrap();

        let events = events_until(&mut h.agent_events, |e| {
            matches!(e, JobEvent::StatusChanged { status: JobStatus::AwaitingPayment, .. })
        })
        .await;
        assert_eq!(
            statuses(&events),
            vec![
                JobStatus::Connecting,
                JobStatus::Transferring,
                JobStatus::Processing,
                JobStatus::AwaitingPayment,
            ]
        );
        let printed: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                JobEvent::FilePrinted { name, output, .. } => Some((name.clone(), output.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(printed.len(), 2);
        assert_eq!(std::fs::read(&printed[1].1).unwrap().len(), 5_000);
        assert!(h.objects.contains(&format!("jobs/{}/report.pdf", job.id)));

        let record = h.repo.require(&job.id).await.unwrap();
        assert_eq!(record.cost, Some(5.0));

        h.agent.confirm_payment(&job.id).await.unwrap();
        h.agent.complete_job(&job.id).await.unwrap();
        assert_eq!(h.repo.require(&job.id).await.unwrap().status, JobStatus::Completed);

        h.agent.delete_job(&job.id).await.unwrap();
        assert!(h.objects.is_empty());
    }

    #[tokio::test]
    async fn empty_file_is_delivered() {
        let mut h = harness(None);
        let job = h
            .client
            .submit("m1", "u1", vec![file("blank.pdf", "application/pdf", 1, 0)])
            .await
            .unwrap();
        let (accepted, sent) =
            tokio::join!(h.agent.accept_job(&job.id), h.client.send_when_accepted(&job));
        accepted.unwrap();
        sent.unwrap();

        let events = events_until(&mut h.agent_events, |e| {
            matches!(e, JobEvent::StatusChanged { status: JobStatus::AwaitingPayment, .. })
        })
        .await;
        assert!(events.iter().any(|e| matches!(e, JobEvent::FilePrinted { .. })));
    }

    #[tokio::test]
    async fn render_failure_is_distinguishable() {
        let surface: Arc<dyn PrintSurface> = Arc::new(BrokenSurface);
        let mut h = harness(Some(surface));
        let job = h
            .client
            .submit("m1", "u1", vec![file("a.pdf", "application/pdf", 1, 100)])
            .await
            .unwrap();
        let (accepted, sent) =
            tokio::join!(h.agent.accept_job(&job.id), h.client.send_when_accepted(&job));
        accepted.unwrap();
        sent.unwrap();

        let events = events_until(&mut h.agent_events, |e| matches!(e, JobEvent::Failed { .. })).await;
        let Some(JobEvent::Failed { reason, .. }) = events.last() else {
            panic!("expected a failure event");
        };
        assert!(reason.starts_with("render:"), "{reason}");

        let record = h.repo.require(&job.id).await.unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.failure_reason.unwrap().starts_with("render:"));
    }

    #[tokio::test]
    async fn invalid_files_are_not_submitted() {
        let h = harness(None);
        let err = h
            .client
            .submit("m1", "u1", vec![file("setup.exe", "application/x-msdownload", 1, 10)])
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Transfer(_)));
        assert!(h.agent.queue("m1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_a_pending_job_releases_the_sender() {
        let h = harness(None);
        let job = h
            .client
            .submit("m1", "u1", vec![file("a.pdf", "application/pdf", 1, 10)])
            .await
            .unwrap();

        let client = Arc::clone(&h.client);
        let waiting = {
            let job = job.clone();
            tokio::spawn(async move { client.send_when_accepted(&job).await })
        };
        tokio::task::yield_now().await;

        h.agent.delete_job(&job.id).await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), waiting)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(JobError::Deleted(_))));
        assert!(matches!(
            h.agent.accept_job(&job.id).await,
            Err(JobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn deleting_mid_negotiation_tears_down_the_session() {
        let h = harness(None);
        let job = h
            .client
            .submit("m1", "u1", vec![file("a.pdf", "application/pdf", 1, 10)])
            .await
            .unwrap();
        h.agent.accept_job(&job.id).await.unwrap();
        assert_eq!(h.agent.peer().active_job(), Some(job.id.clone()));

        h.agent.delete_job(&job.id).await.unwrap();
        assert!(h.agent.peer().active_job().is_none());
        assert_eq!(h.agent.peer().state(), PeerState::Closed);
        assert!(h.repo.get(&job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_job_can_be_accepted_again() {
        let mut h = harness(None);
        let job = h
            .client
            .submit("m1", "u1", vec![file("a.pdf", "application/pdf", 1, 20_000)])
            .await
            .unwrap();
        h.agent.accept_job(&job.id).await.unwrap();
        let first_offer = h.repo.require(&job.id).await.unwrap().offer.unwrap();

        h.agent.peer().teardown();
        h.repo
            .apply_event(
                &job.id,
                StatusEvent::Fail {
                    reason: "transfer: network path failed".into(),
                },
            )
            .await
            .unwrap();

        // The sender does not wait on a failed job.
        assert!(matches!(
            h.client.send_when_accepted(&job).await,
            Err(JobError::Failed { reason, .. }) if reason.starts_with("transfer:")
        ));

        h.agent.accept_job(&job.id).await.unwrap();
        h.client.send_when_accepted(&job).await.unwrap();

        events_until(&mut h.agent_events, |e| {
            matches!(e, JobEvent::StatusChanged { status: JobStatus::AwaitingPayment, .. })
        })
        .await;
        let record = h.repo.require(&job.id).await.unwrap();
        assert_eq!(record.status, JobStatus::AwaitingPayment);
        assert!(record.failure_reason.is_none());
        let offer = record.description(SdpType::Offer).unwrap();
        assert_ne!(offer, &first_offer);
    }

    #[tokio::test]
    async fn accepting_twice_keeps_one_session() {
        let h = harness(None);
        let job = h
            .client
            .submit("m1", "u1", vec![file("a.pdf", "application/pdf", 1, 10)])
            .await
            .unwrap();
        h.agent.accept_job(&job.id).await.unwrap();
        let offer = h.repo.require(&job.id).await.unwrap().offer;
        h.agent.accept_job(&job.id).await.unwrap();
        assert_eq!(h.repo.require(&job.id).await.unwrap().offer, offer);
    }

    #[tokio::test]
    async fn deleting_while_printing_stops_the_job() {
        let gate = Arc::new(GatedSurface::default());
        let surface: Arc<dyn PrintSurface> = gate.clone();
        let h = harness(Some(surface));
        let job = h
            .client
            .submit(
                "m1",
                "u1",
                vec![
                    file("a.pdf", "application/pdf", 1, 100),
                    file("b.pdf", "application/pdf", 1, 100),
                ],
            )
            .await
            .unwrap();
        let (accepted, sent) =
            tokio::join!(h.agent.accept_job(&job.id), h.client.send_when_accepted(&job));
        accepted.unwrap();
        sent.unwrap();

        tokio::time::timeout(Duration::from_secs(5), gate.entered.notified())
            .await
            .expect("first file never reached the printer");
        assert!(h.objects.contains(&format!("jobs/{}/a.pdf", job.id)));

        h.agent.delete_job(&job.id).await.unwrap();
        gate.release.notify_one();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(gate.started(), vec!["a.pdf".to_string()]);
        assert!(h.objects.is_empty());
        assert!(h.repo.get(&job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn accepting_another_job_fails_the_superseded_one() {
        let mut h = harness(None);
        let first = h
            .client
            .submit("m1", "u1", vec![file("a.pdf", "application/pdf", 1, 10)])
            .await
            .unwrap();
        let second = h
            .client
            .submit("m1", "u1", vec![file("b.pdf", "application/pdf", 1, 10)])
            .await
            .unwrap();

        h.agent.accept_job(&first.id).await.unwrap();
        h.agent.accept_job(&second.id).await.unwrap();
        assert_eq!(h.agent.peer().active_job(), Some(second.id.clone()));

        let record = h.repo.require(&first.id).await.unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        let reason = record.failure_reason.unwrap();
        assert_eq!(reason, format!("transfer: superseded by {}", second.id));

        let events = events_until(&mut h.agent_events, |e| matches!(e, JobEvent::Failed { .. })).await;
        assert!(matches!(
            events.last(),
            Some(JobEvent::Failed { job_id, .. }) if *job_id == first.id
        ));

        // The first sender gets an answer instead of waiting forever.
        let result = tokio::time::timeout(Duration::from_secs(5), h.client.send_when_accepted(&first))
            .await
            .unwrap();
        assert!(matches!(result, Err(JobError::Failed { .. })));

        // The second job still goes through.
        h.client.send_when_accepted(&second).await.unwrap();
        events_until(&mut h.agent_events, |e| {
            matches!(
                e,
                JobEvent::StatusChanged { job_id, status: JobStatus::AwaitingPayment } if *job_id == second.id
            )
        })
        .await;
    }

    #[tokio::test]
    async fn sender_waiting_for_an_offer_learns_of_failure() {
        let h = harness(None);
        let job = h
            .client
            .submit("m1", "u1", vec![file("a.pdf", "application/pdf", 1, 10)])
            .await
            .unwrap();
        h.repo.apply_event(&job.id, StatusEvent::Accept).await.unwrap();

        let client = Arc::clone(&h.client);
        let waiting = {
            let job = job.clone();
            tokio::spawn(async move { client.send_when_accepted(&job).await })
        };
        tokio::task::yield_now().await;

        h.repo
            .apply_event(
                &job.id,
                StatusEvent::Fail {
                    reason: "transfer: local resource blocked".into(),
                },
            )
            .await
            .unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), waiting)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            result,
            Err(JobError::Failed { reason, .. }) if reason == "transfer: local resource blocked"
        ));
    }
}
