//! The shared job record and the negotiation payloads it carries.

use serde::{Deserialize, Serialize};

use crate::constants::{ANSWER_CANDIDATES, OFFER_CANDIDATES, fields};
use crate::types::{FileMetadata, JobStatus};

/// Which half of the negotiation a description is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl SdpType {
    /// Job record field holding a description of this type.
    pub fn field(&self) -> &'static str {
        match self {
            SdpType::Offer => fields::OFFER,
            SdpType::Answer => fields::ANSWER,
        }
    }
}

/// A local or remote connection description (`{sdp, type}` on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type: SdpType::Offer,
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type: SdpType::Answer,
        }
    }
}

/// A network-path candidate, round-tripped verbatim through the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Negotiation role of a participant.
///
/// The print agent creates the offer; the file sender answers it and opens
/// the data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Offerer,
    Answerer,
}

impl Role {
    /// Type of the description this role publishes.
    pub fn local_sdp_type(&self) -> SdpType {
        match self {
            Role::Offerer => SdpType::Offer,
            Role::Answerer => SdpType::Answer,
        }
    }

    /// Type of the description this role waits for.
    pub fn remote_sdp_type(&self) -> SdpType {
        match self {
            Role::Offerer => SdpType::Answer,
            Role::Answerer => SdpType::Offer,
        }
    }

    /// Sub-collection this role appends its candidates to.
    pub fn local_candidates(&self) -> &'static str {
        match self {
            Role::Offerer => OFFER_CANDIDATES,
            Role::Answerer => ANSWER_CANDIDATES,
        }
    }

    /// Sub-collection holding the peer's candidates.
    pub fn remote_candidates(&self) -> &'static str {
        match self {
            Role::Offerer => ANSWER_CANDIDATES,
            Role::Answerer => OFFER_CANDIDATES,
        }
    }
}

/// A print job as stored in the shared document store.
///
/// The document id is not part of the stored fields; the repository fills
/// [`JobRecord::id`] when reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    #[serde(skip)]
    pub id: String,
    #[serde(default)]
    pub merchant_id: String,
    #[serde(default)]
    pub user_id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub files: Vec<FileMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl JobRecord {
    /// Creates a pending job for the given files.
    pub fn new(
        merchant_id: impl Into<String>,
        user_id: impl Into<String>,
        files: Vec<FileMetadata>,
    ) -> Self {
        Self {
            id: String::new(),
            merchant_id: merchant_id.into(),
            user_id: user_id.into(),
            status: JobStatus::Pending,
            files,
            cost: None,
            offer: None,
            answer: None,
            created_at: None,
            failure_reason: None,
        }
    }

    /// Sum of all file sizes: the length of the transferred blob.
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Returns the description of the given type, if published.
    pub fn description(&self, sdp_type: SdpType) -> Option<&SessionDescription> {
        match sdp_type {
            SdpType::Offer => self.offer.as_ref(),
            SdpType::Answer => self.answer.as_ref(),
        }
    }
}
