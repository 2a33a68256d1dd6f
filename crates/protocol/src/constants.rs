//! Protocol constants shared by both participants.

/// Document-store collection holding one record per print job.
pub const JOBS_COLLECTION: &str = "printJobs";

/// Sub-collection of candidates contributed by the offerer (print agent).
pub const OFFER_CANDIDATES: &str = "offerCandidates";

/// Sub-collection of candidates contributed by the answerer (sender).
pub const ANSWER_CANDIDATES: &str = "answerCandidates";

/// Maximum payload of one data frame: 16 KiB.
///
/// Fixed on both ends, never negotiated. Stays below the message-size and
/// buffered-amount limits common to data-channel implementations.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Textual end-of-transfer marker sent after the last data frame.
pub const EOF_SENTINEL: &str = "EOF";

/// Label of the data channel opened by the answerer.
pub const DATA_CHANNEL_LABEL: &str = "fileChannel";

/// Largest message a data channel accepts (256 KiB).
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024;

/// The sender pauses while more than this many bytes are queued on the channel.
pub const MAX_BUFFERED_AMOUNT: usize = 1024 * 1024;

/// Default number of pre-gathered ICE candidates.
pub const DEFAULT_ICE_CANDIDATE_POOL_SIZE: u8 = 10;

/// Record field names, for field-scoped updates.
pub mod fields {
    pub const STATUS: &str = "status";
    pub const OFFER: &str = "offer";
    pub const ANSWER: &str = "answer";
    pub const COST: &str = "cost";
    pub const FAILURE_REASON: &str = "failureReason";
    pub const MERCHANT_ID: &str = "merchantId";
    pub const CREATED_AT: &str = "createdAt";
}
