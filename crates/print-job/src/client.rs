//! The sending side: submits jobs and streams their files once accepted.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use printlink_peer_connection::{PeerConnectionManager, PeerError, PeerState};
use printlink_protocol::{FileMetadata, JobRecord, JobStatus, PrintSpec};
use printlink_store::DocumentStore;
use printlink_transfer::{
    bundle_files, checksum_bytes, file_type_name, format_file_size, validate_files,
};

use crate::agent::RENDER_FAILURE;
use crate::error::JobError;
use crate::events::JobEvent;
use crate::repository::{JobRepository, JobWatch};

/// A file picked for printing.
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    pub name: String,
    pub mime_type: Option<String>,
    pub specs: PrintSpec,
    pub contents: Vec<u8>,
}

/// A submitted job together with the payload that will be sent for it.
#[derive(Debug, Clone)]
pub struct PendingJob {
    pub id: String,
    pub files: Vec<FileMetadata>,
    blob: Vec<u8>,
}

impl PendingJob {
    pub fn total_bytes(&self) -> u64 {
        self.blob.len() as u64
    }
}

/// File sender coordinator.
pub struct PrintClient {
    repo: JobRepository,
    peer: PeerConnectionManager,
    events_tx: mpsc::Sender<JobEvent>,
    events_rx: Option<mpsc::Receiver<JobEvent>>,
}

impl PrintClient {
    pub fn new(store: Arc<dyn DocumentStore>, peer: PeerConnectionManager) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        Self {
            repo: JobRepository::new(store),
            peer,
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<JobEvent>> {
        self.events_rx.take()
    }

    pub fn peer(&self) -> &PeerConnectionManager {
        &self.peer
    }

    /// Validates the files and records a pending job for `merchant_id`.
    ///
    /// Each file's size and SHA-256 checksum are taken from its contents.
    pub async fn submit(
        &self,
        merchant_id: &str,
        user_id: &str,
        files: Vec<OutgoingFile>,
    ) -> Result<PendingJob, JobError> {
        let metadata: Vec<FileMetadata> = files
            .iter()
            .map(|f| FileMetadata {
                name: f.name.clone(),
                size: f.contents.len() as u64,
                mime_type: f.mime_type.clone(),
                checksum: Some(checksum_bytes(&f.contents)),
                specs: f.specs.clone(),
            })
            .collect();
        let total = validate_files(&metadata).into_result()?;
        for file in &metadata {
            debug!(
                file = %file.name,
                kind = file_type_name(&file.name, file.mime_type.as_deref()),
                size = %format_file_size(file.size),
                "file accepted"
            );
        }

        let contents: Vec<Vec<u8>> = files.into_iter().map(|f| f.contents).collect();
        let blob = bundle_files(&contents);

        let record = JobRecord::new(merchant_id, user_id, metadata.clone());
        let id = self.repo.create(&record).await?;
        info!(job = %id, files = metadata.len(), size = %format_file_size(total), "job submitted");
        self.emit(JobEvent::StatusChanged {
            job_id: id.clone(),
            status: JobStatus::Pending,
        });

        Ok(PendingJob {
            id,
            files: metadata,
            blob,
        })
    }

    /// Waits for the agent's offer, answers it and sends the payload.
    ///
    /// Resolves once the payload has been handed over in full. Fails if the
    /// job is deleted, if the agent marks it failed before the payload
    /// arrived, or if the session ends early. There is no built-in timeout;
    /// wrap the call in one if needed.
    pub async fn send_when_accepted(&self, job: &PendingJob) -> Result<(), JobError> {
        let mut record = self.wait_for_offer(&job.id).await?;

        let events = self.events_tx.clone();
        self.peer
            .create_inbound_answer(&job.id, job.blob.clone(), move |progress| {
                let _ = events.try_send(JobEvent::Progress(progress));
            })
            .await?;
        info!(job = %job.id, bytes = job.total_bytes(), "answer published, waiting for channel");

        let mut state = self.peer.watch_state();
        loop {
            let current = state.borrow_and_update().clone();
            match current {
                PeerState::Closed => {
                    let sent = self.peer.bytes_transferred();
                    return if sent == job.total_bytes() {
                        info!(job = %job.id, bytes = sent, "payload delivered");
                        Ok(())
                    } else {
                        Err(PeerError::SessionClosed.into())
                    };
                }
                PeerState::Failed { reason } => {
                    return Err(PeerError::ChannelClosedPrematurely(reason).into());
                }
                _ => {}
            }
            tokio::select! {
                changed = state.changed() => {
                    if changed.is_err() {
                        return Err(PeerError::SessionClosed.into());
                    }
                }
                update = record.next() => match update {
                    Some(Some(current)) if current.status == JobStatus::Failed => {
                        let reason = current.failure_reason.unwrap_or_default();
                        // Printing failures happen after delivery.
                        if !reason.starts_with(RENDER_FAILURE) {
                            self.abandon(&job.id);
                            return Err(JobError::Failed {
                                job: job.id.clone(),
                                reason,
                            });
                        }
                    }
                    Some(Some(_)) => {}
                    Some(None) | None => {
                        self.abandon(&job.id);
                        return Err(JobError::Deleted(job.id.clone()));
                    }
                },
            }
        }
    }

    /// Deletes the job, abandoning any transfer in progress.
    pub async fn delete_job(&self, job_id: &str) -> Result<(), JobError> {
        self.abandon(job_id);
        self.repo.delete(job_id).await
    }

    fn abandon(&self, job_id: &str) {
        if self.peer.active_job().as_deref() == Some(job_id) {
            self.peer.teardown();
        }
    }

    /// Waits for an offer to answer. A failed job is not waited on; the
    /// agent has to accept it again first.
    async fn wait_for_offer(&self, job_id: &str) -> Result<JobWatch, JobError> {
        let mut watch = self.repo.watch(job_id)?;
        loop {
            match watch.next().await {
                Some(Some(job)) => {
                    if job.status == JobStatus::Failed {
                        return Err(JobError::Failed {
                            job: job_id.to_string(),
                            reason: job.failure_reason.unwrap_or_default(),
                        });
                    }
                    if job.status == JobStatus::Connecting
                        && job.offer.is_some()
                        && job.answer.is_none()
                    {
                        debug!(job = %job_id, "offer available");
                        return Ok(watch);
                    }
                    debug!(job = %job_id, status = %job.status, "waiting for offer");
                }
                Some(None) | None => return Err(JobError::Deleted(job_id.to_string())),
            }
        }
    }

    fn emit(&self, event: JobEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            debug!(error = %e, "job event dropped");
        }
    }
}
