//! Print job coordination.
//!
//! [`lifecycle`] holds the status state machine. [`JobRepository`] applies
//! it to records in the shared store. [`PrintAgent`] and [`PrintClient`]
//! drive the two sides of a job: the agent accepts, receives, prices and
//! prints; the client submits and sends once the agent has made an offer.

mod agent;
mod client;
mod error;
mod events;
pub mod lifecycle;
mod pricing;
mod repository;
mod surface;

pub use agent::{PrintAgent, PrintAgentBuilder};
pub use client::{OutgoingFile, PendingJob, PrintClient};
pub use error::JobError;
pub use events::JobEvent;
pub use lifecycle::{StatusEvent, Transition, transition};
pub use pricing::{PerCopyPricing, PricingPolicy};
pub use repository::{JobRepository, JobWatch};
pub use surface::{PrintSurface, RenderError, RenderFuture, SpoolSurface};
