//! Job status state machine.
//!
//! ```text
//! pending -> connecting -> transferring -> processing -> awaitingPayment -> paid -> completed
//!                 |             |              |               ^
//!                 |             +--------------|---------------+
//!                 +-------------+--------------+--> failed --(accept)--> connecting
//! ```
//!
//! Status never moves backwards. An event whose target has already been
//! reached or passed is a no-op. Deletion is not a transition; the
//! repository removes the record outright.

use printlink_protocol::JobStatus;

/// Something that happened to a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// The agent accepted the job and starts negotiating.
    Accept,
    /// The data channel opened and bytes started flowing.
    ChannelOpened,
    /// The agent holds the complete payload.
    FileReceived,
    /// A cost was computed.
    Priced,
    PaymentConfirmed,
    Completed,
    Fail { reason: String },
}

impl StatusEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StatusEvent::Accept => "accept",
            StatusEvent::ChannelOpened => "channel-opened",
            StatusEvent::FileReceived => "file-received",
            StatusEvent::Priced => "priced",
            StatusEvent::PaymentConfirmed => "payment-confirmed",
            StatusEvent::Completed => "completed",
            StatusEvent::Fail { .. } => "fail",
        }
    }

    /// Status the event leads to.
    pub fn target(&self) -> JobStatus {
        match self {
            StatusEvent::Accept => JobStatus::Connecting,
            StatusEvent::ChannelOpened => JobStatus::Transferring,
            StatusEvent::FileReceived => JobStatus::Processing,
            StatusEvent::Priced => JobStatus::AwaitingPayment,
            StatusEvent::PaymentConfirmed => JobStatus::Paid,
            StatusEvent::Completed => JobStatus::Completed,
            StatusEvent::Fail { .. } => JobStatus::Failed,
        }
    }

    fn allowed_from(&self, status: JobStatus) -> bool {
        use JobStatus::*;
        match self {
            StatusEvent::Accept => matches!(status, Pending | Failed),
            StatusEvent::ChannelOpened => status == Connecting,
            StatusEvent::FileReceived => status == Transferring,
            StatusEvent::Priced => matches!(status, Transferring | Processing),
            StatusEvent::PaymentConfirmed => status == AwaitingPayment,
            StatusEvent::Completed => status == Paid,
            StatusEvent::Fail { .. } => matches!(status, Connecting | Transferring | Processing),
        }
    }
}

/// Result of applying an event to a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Advance(JobStatus),
    /// Duplicate or late event; nothing to write.
    NoOp,
    Rejected { from: JobStatus, event: &'static str },
}

/// Applies `event` to `status`.
pub fn transition(status: JobStatus, event: &StatusEvent) -> Transition {
    let target = event.target();
    if status == target {
        return Transition::NoOp;
    }
    if event.allowed_from(status) {
        return Transition::Advance(target);
    }
    match (status.rank(), target.rank()) {
        (Some(current), Some(target)) if current > target => Transition::NoOp,
        _ => Transition::Rejected {
            from: status,
            event: event.name(),
        },
    }
}
