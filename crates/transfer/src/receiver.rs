use tracing::{debug, warn};

use printlink_protocol::{ChannelMessage, TransferProgress};

use crate::TransferError;
use crate::frame::Frame;

/// Result of feeding one message to a [`Reassembler`].
#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// A data frame was appended.
    Buffered,
    /// The marker arrived; the rebuilt blob is handed over exactly once.
    Complete(Vec<u8>),
    /// The message violated the protocol and was dropped.
    Ignored,
    /// The marker arrived but the blob is not the announced size.
    SizeMismatch { expected: u64, actual: u64 },
}

/// Rebuilds a blob from frames received in order.
pub struct Reassembler {
    job_id: String,
    frames: Vec<Vec<u8>>,
    received: u64,
    expected: Option<u64>,
    completed: bool,
}

impl Reassembler {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            frames: Vec::new(),
            received: 0,
            expected: None,
            completed: false,
        }
    }

    /// Sets the blob size announced in the job record. A blob of any other
    /// size is refused when the marker arrives.
    pub fn with_expected_size(mut self, total: u64) -> Self {
        self.expected = Some(total);
        self
    }

    pub fn push(&mut self, message: ChannelMessage) -> PushOutcome {
        if self.completed {
            warn!(job = %self.job_id, len = message.len(), "frame after end-of-transfer marker, ignoring");
            return PushOutcome::Ignored;
        }
        match Frame::from_message(message) {
            Ok(Frame::Data(data)) => {
                self.received += data.len() as u64;
                self.frames.push(data);
                PushOutcome::Buffered
            }
            Ok(Frame::End) => {
                self.completed = true;
                let blob = self.frames.concat();
                self.frames = Vec::new();
                let actual = blob.len() as u64;
                if let Some(expected) = self.expected.filter(|e| *e != actual) {
                    warn!(job = %self.job_id, expected, actual, "blob size differs from job record");
                    return PushOutcome::SizeMismatch { expected, actual };
                }
                debug!(job = %self.job_id, bytes = blob.len(), "transfer complete");
                PushOutcome::Complete(blob)
            }
            Err(e) => {
                warn!(job = %self.job_id, error = %e, "dropping frame");
                PushOutcome::Ignored
            }
        }
    }

    /// Checks the transfer when the channel closes.
    ///
    /// Closing before the marker is an error, never a partial success.
    pub fn on_channel_closed(&self) -> Result<(), TransferError> {
        if self.completed {
            Ok(())
        } else {
            Err(TransferError::ChannelClosedPrematurely {
                received: self.received,
            })
        }
    }

    pub fn bytes_received(&self) -> u64 {
        self.received
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    pub fn progress(&self) -> TransferProgress {
        TransferProgress {
            job_id: self.job_id.clone(),
            bytes_transferred: self.received,
            total_bytes: self.expected.unwrap_or(self.received),
        }
    }
}
