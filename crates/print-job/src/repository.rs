//! Job records in the shared store.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use printlink_protocol::{JOBS_COLLECTION, JobRecord, JobStatus, fields};
use printlink_store::{
    Document, DocumentSnapshot, DocumentStore, StoreError, Watch, to_document,
};

use crate::error::JobError;
use crate::lifecycle::{StatusEvent, Transition, transition};

/// Typed access to the `printJobs` collection.
#[derive(Clone)]
pub struct JobRepository {
    store: Arc<dyn DocumentStore>,
}

impl JobRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Stores a new job and returns its id. Stamps `createdAt` when unset.
    pub async fn create(&self, record: &JobRecord) -> Result<String, JobError> {
        let mut record = record.clone();
        if record.created_at.is_none() {
            record.created_at = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
        }
        let id = self
            .store
            .create(JOBS_COLLECTION, to_document(&record)?)
            .await?;
        info!(job = %id, merchant = %record.merchant_id, files = record.files.len(), "job created");
        Ok(id)
    }

    pub async fn get(&self, job_id: &str) -> Result<Option<JobRecord>, JobError> {
        match self.store.get(JOBS_COLLECTION, job_id).await? {
            Some(doc) => Ok(Some(parse_record(job_id, doc)?)),
            None => Ok(None),
        }
    }

    /// Like [`get`](Self::get), but a missing job is an error.
    pub async fn require(&self, job_id: &str) -> Result<JobRecord, JobError> {
        self.get(job_id)
            .await?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    /// Jobs addressed to `merchant_id`, newest first.
    pub async fn list_for_merchant(&self, merchant_id: &str) -> Result<Vec<JobRecord>, JobError> {
        let docs = self
            .store
            .list(
                JOBS_COLLECTION,
                Some((fields::MERCHANT_ID, Value::String(merchant_id.to_string()))),
            )
            .await?;

        let mut jobs = Vec::with_capacity(docs.len());
        for (id, doc) in docs {
            match parse_record(&id, doc) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!(job = %id, error = %e, "skipping malformed job record"),
            }
        }
        jobs.sort_by_key(|job| std::cmp::Reverse(created_at(job)));
        Ok(jobs)
    }

    /// Applies a lifecycle event and writes the new status.
    ///
    /// Returns the transition taken. A rejected event is an error and
    /// leaves the record untouched.
    pub async fn apply_event(
        &self,
        job_id: &str,
        event: StatusEvent,
    ) -> Result<Transition, JobError> {
        let job = self.require(job_id).await?;
        match transition(job.status, &event) {
            Transition::Advance(status) => {
                let mut update = Map::new();
                update.insert(fields::STATUS.into(), Value::String(status.as_str().into()));
                match &event {
                    StatusEvent::Fail { reason } => {
                        update.insert(fields::FAILURE_REASON.into(), Value::String(reason.clone()));
                    }
                    StatusEvent::Accept if job.status == JobStatus::Failed => {
                        update.insert(fields::FAILURE_REASON.into(), Value::Null);
                    }
                    _ => {}
                }
                self.update(job_id, update).await?;
                info!(job = %job_id, from = %job.status, to = %status, "job status advanced");
                Ok(Transition::Advance(status))
            }
            Transition::NoOp => {
                debug!(job = %job_id, status = %job.status, event = event.name(), "event already applied");
                Ok(Transition::NoOp)
            }
            Transition::Rejected { from, event } => Err(JobError::InvalidTransition {
                job: job_id.to_string(),
                from,
                event,
            }),
        }
    }

    pub async fn set_cost(&self, job_id: &str, cost: f64) -> Result<(), JobError> {
        let mut update = Map::new();
        update.insert(fields::COST.into(), Value::from(cost));
        self.update(job_id, update).await
    }

    /// Removes the job and its candidate sub-collections.
    pub async fn delete(&self, job_id: &str) -> Result<(), JobError> {
        self.store
            .delete(JOBS_COLLECTION, job_id)
            .await
            .map_err(|e| not_found(job_id, e))?;
        info!(job = %job_id, "job deleted");
        Ok(())
    }

    /// Watches one job. The first update is its current state.
    pub fn watch(&self, job_id: &str) -> Result<JobWatch, JobError> {
        let inner = self.store.subscribe(JOBS_COLLECTION, job_id)?;
        Ok(JobWatch { inner })
    }

    async fn update(&self, job_id: &str, update: Document) -> Result<(), JobError> {
        self.store
            .update(JOBS_COLLECTION, job_id, update)
            .await
            .map_err(|e| not_found(job_id, e))
    }
}

/// Change stream of one job record.
pub struct JobWatch {
    inner: Watch<DocumentSnapshot>,
}

impl JobWatch {
    /// Waits for the next state of the job.
    ///
    /// Yields `Some(None)` once the job is deleted and `None` when the
    /// watch has been released. Malformed snapshots are skipped.
    pub async fn next(&mut self) -> Option<Option<JobRecord>> {
        loop {
            let snapshot = self.inner.updates.recv().await?;
            let Some(doc) = snapshot.data else {
                return Some(None);
            };
            match parse_record(&snapshot.id, doc) {
                Ok(job) => return Some(Some(job)),
                Err(e) => warn!(job = %snapshot.id, error = %e, "ignoring malformed job snapshot"),
            }
        }
    }

    pub fn unsubscribe(&mut self) {
        self.inner.subscription.unsubscribe();
    }
}

fn parse_record(id: &str, doc: Document) -> Result<JobRecord, JobError> {
    let mut job: JobRecord = serde_json::from_value(Value::Object(doc))?;
    job.id = id.to_string();
    Ok(job)
}

fn created_at(job: &JobRecord) -> Option<DateTime<Utc>> {
    job.created_at
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn not_found(job_id: &str, err: StoreError) -> JobError {
    match err {
        StoreError::NotFound { .. } => JobError::NotFound(job_id.to_string()),
        other => JobError::Store(other),
    }
}
