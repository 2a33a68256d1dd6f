//! Store-backed offer/answer and candidate exchange.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use printlink_protocol::{
    IceCandidate, JOBS_COLLECTION, Role, SdpType, SessionDescription, fields,
};
use printlink_store::{Document, DocumentStore, Subscription, to_document};

use crate::error::SignalingError;

/// Turns local negotiation output into store writes and remote store
/// changes into callbacks.
#[derive(Clone)]
pub struct SignalingExchange {
    store: Arc<dyn DocumentStore>,
}

impl SignalingExchange {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Writes the local description into the job field matching its type.
    ///
    /// Publishing the same description twice is a no-op. A job carries one
    /// offer and at most one answer: a different description for an
    /// occupied field is refused, an offer for an already answered job is
    /// refused as stale, and an answer requires an offer.
    pub async fn publish_local_description(
        &self,
        job_id: &str,
        description: &SessionDescription,
    ) -> Result<(), SignalingError> {
        let doc = self.job(job_id).await?;
        let field = description.sdp_type.field();

        if let Some(existing) = parse_description(job_id, &doc, description.sdp_type)? {
            if &existing == description {
                debug!(job = %job_id, field, "description already published");
                return Ok(());
            }
            if description.sdp_type == SdpType::Offer && doc.contains_key(fields::ANSWER) {
                return Err(SignalingError::StaleOffer(job_id.to_string()));
            }
            return Err(SignalingError::DescriptionAlreadySet {
                job: job_id.to_string(),
                sdp_type: description.sdp_type,
            });
        }

        match description.sdp_type {
            SdpType::Offer if doc.contains_key(fields::ANSWER) => {
                return Err(SignalingError::StaleOffer(job_id.to_string()));
            }
            SdpType::Answer if !doc.contains_key(fields::OFFER) => {
                return Err(SignalingError::NoOfferFound(job_id.to_string()));
            }
            _ => {}
        }

        let mut update = Document::new();
        update.insert(field.to_string(), Value::Object(to_document(description)?));
        self.store.update(JOBS_COLLECTION, job_id, update).await?;
        info!(job = %job_id, field, "local description published");
        Ok(())
    }

    /// Reads the offer the answerer must respond to.
    ///
    /// Fails with [`SignalingError::NoOfferFound`] rather than waiting.
    pub async fn fetch_remote_offer(
        &self,
        job_id: &str,
    ) -> Result<SessionDescription, SignalingError> {
        let doc = self.job(job_id).await?;
        parse_description(job_id, &doc, SdpType::Offer)?
            .ok_or_else(|| SignalingError::NoOfferFound(job_id.to_string()))
    }

    /// Watches the job for the peer's description.
    ///
    /// `on_received` runs exactly once: the first time a description of the
    /// opposite type is present while `permit` returns `true`. The watch
    /// ends right after, or when the job is deleted.
    pub fn subscribe_remote_description<P, F>(
        &self,
        job_id: &str,
        role: Role,
        permit: P,
        on_received: F,
    ) -> Result<Subscription, SignalingError>
    where
        P: Fn() -> bool + Send + 'static,
        F: FnOnce(SessionDescription) + Send + 'static,
    {
        let mut watch = self.store.subscribe(JOBS_COLLECTION, job_id)?;
        let token = CancellationToken::new();
        let cancel = token.clone();
        let expected = role.remote_sdp_type();
        let job = job_id.to_string();

        tokio::spawn(async move {
            loop {
                let snapshot = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    next = watch.updates.recv() => match next {
                        Some(snapshot) => snapshot,
                        None => break,
                    },
                };
                let Some(doc) = snapshot.data else {
                    debug!(job = %job, "job deleted, remote description watch ends");
                    break;
                };
                let description = match parse_description(&job, &doc, expected) {
                    Ok(Some(d)) => d,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(job = %job, error = %e, "ignoring remote description");
                        continue;
                    }
                };
                if !permit() {
                    debug!(job = %job, field = expected.field(), "remote description not applicable now");
                    continue;
                }
                debug!(job = %job, field = expected.field(), "remote description received");
                on_received(description);
                break;
            }
            watch.subscription.unsubscribe();
        });

        Ok(Subscription::new(
            format!("{job_id}/{}", expected.field()),
            token,
        ))
    }

    /// Appends one local candidate to the role's sub-collection.
    pub async fn publish_local_candidate(
        &self,
        job_id: &str,
        role: Role,
        candidate: &IceCandidate,
    ) -> Result<(), SignalingError> {
        let entry = to_document(candidate)?;
        let id = self
            .store
            .append_child(JOBS_COLLECTION, job_id, role.local_candidates(), entry)
            .await?;
        trace!(job = %job_id, entry = %id, sub = role.local_candidates(), "candidate published");
        Ok(())
    }

    /// Calls `on_candidate` for each candidate the peer appends.
    ///
    /// Entries already present are replayed first. An entry is delivered
    /// once per subscription even if the store repeats it.
    pub fn subscribe_remote_candidates<F>(
        &self,
        job_id: &str,
        role: Role,
        mut on_candidate: F,
    ) -> Result<Subscription, SignalingError>
    where
        F: FnMut(IceCandidate) + Send + 'static,
    {
        let sub = role.remote_candidates();
        let mut watch = self
            .store
            .subscribe_children(JOBS_COLLECTION, job_id, sub)?;
        let token = CancellationToken::new();
        let cancel = token.clone();
        let job = job_id.to_string();

        tokio::spawn(async move {
            let mut seen = HashSet::new();
            loop {
                let child = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    next = watch.updates.recv() => match next {
                        Some(child) => child,
                        None => break,
                    },
                };
                if !seen.insert(child.id.clone()) {
                    continue;
                }
                match child.parse::<IceCandidate>() {
                    Ok(candidate) => on_candidate(candidate),
                    Err(e) => warn!(job = %job, entry = %child.id, error = %e, "malformed candidate"),
                }
            }
            watch.subscription.unsubscribe();
        });

        Ok(Subscription::new(format!("{job_id}/{sub}"), token))
    }

    /// Clears both descriptions so the job can be negotiated from scratch.
    ///
    /// Candidate sub-collections are append-only and stay; entries from
    /// the abandoned attempt carry a stale username fragment and are
    /// dropped by the transport.
    pub async fn reset_negotiation(&self, job_id: &str) -> Result<(), SignalingError> {
        let mut update = Document::new();
        update.insert(fields::OFFER.to_string(), Value::Null);
        update.insert(fields::ANSWER.to_string(), Value::Null);
        self.store.update(JOBS_COLLECTION, job_id, update).await?;
        info!(job = %job_id, "negotiation reset");
        Ok(())
    }

    async fn job(&self, job_id: &str) -> Result<Document, SignalingError> {
        self.store
            .get(JOBS_COLLECTION, job_id)
            .await?
            .ok_or_else(|| SignalingError::JobNotFound(job_id.to_string()))
    }
}

fn parse_description(
    job_id: &str,
    doc: &Document,
    sdp_type: SdpType,
) -> Result<Option<SessionDescription>, SignalingError> {
    let Some(value) = doc.get(sdp_type.field()).filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    let malformed = |reason: String| SignalingError::Malformed {
        job: job_id.to_string(),
        field: sdp_type.field().to_string(),
        reason,
    };
    let description: SessionDescription =
        serde_json::from_value(value.clone()).map_err(|e| malformed(e.to_string()))?;
    if description.sdp_type != sdp_type {
        return Err(malformed(format!("type is {:?}", description.sdp_type)));
    }
    Ok(Some(description))
}
