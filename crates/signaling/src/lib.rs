//! Signaling exchange.
//!
//! Negotiation payloads travel through the job record itself: the offer
//! and answer are fields of the job document, and discovered candidates
//! are appended to the `offerCandidates` / `answerCandidates`
//! sub-collections. Every subscription hands back a
//! [`Subscription`](printlink_store::Subscription) that the owning peer
//! session releases on teardown.

pub mod error;
pub mod exchange;

pub use error::SignalingError;
pub use exchange::SignalingExchange;
