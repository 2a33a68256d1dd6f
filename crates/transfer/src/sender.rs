use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use printlink_data_channel::{DataChannel, ReadyState, RtcError};
use printlink_protocol::{CHUNK_SIZE, MAX_BUFFERED_AMOUNT, TransferProgress};

use crate::TransferError;
use crate::frame::{Frame, FrameSplitter, frame_count};
use crate::progress::TransferRate;

/// Re-check interval for channels that never signal readiness.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Streams one blob over an open data channel.
pub struct ChunkedSender {
    job_id: String,
    channel: Arc<dyn DataChannel>,
    blob: Vec<u8>,
    chunk_size: usize,
    ready: Arc<Notify>,
}

impl ChunkedSender {
    pub fn new(job_id: impl Into<String>, channel: Arc<dyn DataChannel>, blob: Vec<u8>) -> Self {
        Self {
            job_id: job_id.into(),
            channel,
            blob,
            chunk_size: CHUNK_SIZE,
            ready: Arc::new(Notify::new()),
        }
    }

    /// Overrides the frame size. Both ends must agree on it out of band.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Handle the channel owner notifies on open and on buffered-amount-low.
    pub fn ready_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.ready)
    }

    /// Sends every frame followed by the marker.
    ///
    /// Each frame waits until the channel is open with room in its send
    /// buffer. `on_progress` runs after every data frame with the running
    /// total; an empty blob reports `0 / 0` once. Returns the number of
    /// payload bytes sent.
    pub async fn run<F>(self, mut on_progress: F, cancel: CancellationToken) -> Result<u64, TransferError>
    where
        F: FnMut(TransferProgress),
    {
        let total = self.blob.len() as u64;
        let frames = frame_count(self.blob.len(), self.chunk_size);
        let mut rate = TransferRate::default();
        let mut sent: u64 = 0;

        info!(job = %self.job_id, bytes = total, frames, "starting transfer");

        for frame in FrameSplitter::new(&self.blob, self.chunk_size) {
            self.wait_ready(&cancel).await?;

            let len = frame.payload_len() as u64;
            let is_end = frame == Frame::End;
            self.channel.send(frame.into_message()).map_err(|e| match e {
                RtcError::ChannelNotOpen(_) | RtcError::Closed => TransferError::ChannelClosed,
                other => TransferError::Rtc(other),
            })?;

            if is_end {
                break;
            }
            sent += len;
            rate.record(len);
            trace!(
                job = %self.job_id,
                sent,
                total,
                eta_ms = rate.eta(total - sent).map(|d| d.as_millis() as u64),
                "frame sent"
            );
            on_progress(TransferProgress {
                job_id: self.job_id.clone(),
                bytes_transferred: sent,
                total_bytes: total,
            });

            // Yield between frames so the event loop stays responsive.
            tokio::task::yield_now().await;
        }

        if frames == 0 {
            on_progress(TransferProgress {
                job_id: self.job_id.clone(),
                bytes_transferred: 0,
                total_bytes: 0,
            });
        }

        debug!(
            job = %self.job_id,
            bytes = sent,
            bytes_per_sec = rate.bytes_per_second().map(|r| r as u64),
            "end-of-transfer marker sent"
        );
        Ok(sent)
    }

    async fn wait_ready(&self, cancel: &CancellationToken) -> Result<(), TransferError> {
        loop {
            match self.channel.ready_state() {
                ReadyState::Open if self.channel.buffered_amount() <= MAX_BUFFERED_AMOUNT => {
                    return Ok(());
                }
                ReadyState::Closing | ReadyState::Closed => return Err(TransferError::ChannelClosed),
                _ => {}
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                _ = self.ready.notified() => {}
                _ = tokio::time::sleep(READY_POLL_INTERVAL) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use printlink_protocol::ChannelMessage;

    use super::*;
    use crate::receiver::{PushOutcome, Reassembler};

    /// Records sent messages; can start closed, backed up, or close after N sends.
    struct MockChannel {
        state: Mutex<ReadyState>,
        buffered: AtomicUsize,
        close_after: Option<usize>,
        sent: Mutex<Vec<ChannelMessage>>,
    }

    impl MockChannel {
        fn open() -> Arc<Self> {
            Self::with(ReadyState::Open, None)
        }

        fn with(state: ReadyState, close_after: Option<usize>) -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(state),
                buffered: AtomicUsize::new(0),
                close_after,
                sent: Mutex::new(Vec::new()),
            })
        }

        fn set_state(&self, state: ReadyState) {
            *self.state.lock().unwrap() = state;
        }

        fn sent(&self) -> Vec<ChannelMessage> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl DataChannel for MockChannel {
        fn label(&self) -> &str {
            "fileChannel"
        }

        fn ready_state(&self) -> ReadyState {
            *self.state.lock().unwrap()
        }

        fn send(&self, message: ChannelMessage) -> Result<(), RtcError> {
            if self.ready_state() != ReadyState::Open {
                return Err(RtcError::ChannelNotOpen("fileChannel".into()));
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push(message);
            if self.close_after == Some(sent.len()) {
                *self.state.lock().unwrap() = ReadyState::Closed;
            }
            Ok(())
        }

        fn buffered_amount(&self) -> usize {
            self.buffered.load(Ordering::SeqCst)
        }

        fn close(&self) {
            self.set_state(ReadyState::Closed);
        }
    }

    #[tokio::test]
    async fn sends_frames_then_marker_with_monotonic_progress() {
        let channel = MockChannel::open();
        let blob: Vec<u8> = (0..50_000u32).map(|i| i as u8).collect();
        let mut progress = Vec::new();

        let sent = ChunkedSender::new("job-1", channel.clone(), blob.clone())
            .run(|p| progress.push(p.bytes_transferred), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(sent, 50_000);

        let messages = channel.sent();
        assert_eq!(messages.len(), 5);
        assert!(messages.last().unwrap().is_sentinel());
        assert_eq!(messages.iter().filter(|m| m.is_sentinel()).count(), 1);

        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(progress.last(), Some(&50_000));

        let mut r = Reassembler::new("job-1");
        let mut rebuilt = None;
        for m in messages {
            if let PushOutcome::Complete(b) = r.push(m) {
                rebuilt = Some(b);
            }
        }
        assert_eq!(rebuilt.unwrap(), blob);
    }

    #[tokio::test]
    async fn empty_blob_sends_only_marker() {
        let channel = MockChannel::open();
        let mut progress = Vec::new();
        let sent = ChunkedSender::new("job-0", channel.clone(), Vec::new())
            .run(|p| progress.push((p.bytes_transferred, p.total_bytes)), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(sent, 0);
        assert_eq!(channel.sent(), vec![ChannelMessage::sentinel()]);
        assert_eq!(progress, vec![(0, 0)]);
    }

    #[tokio::test]
    async fn waits_for_channel_to_open() {
        let channel = MockChannel::with(ReadyState::Connecting, None);
        let sender = ChunkedSender::new("job-2", channel.clone(), vec![1, 2, 3]);
        let ready = sender.ready_signal();
        let task = tokio::spawn(sender.run(|_| {}, CancellationToken::new()));

        tokio::task::yield_now().await;
        assert!(channel.sent().is_empty());

        channel.set_state(ReadyState::Open);
        ready.notify_one();
        assert_eq!(task.await.unwrap().unwrap(), 3);
        assert_eq!(channel.sent().len(), 2);
    }

    #[tokio::test]
    async fn waits_while_send_buffer_is_full() {
        let channel = MockChannel::open();
        channel.buffered.store(MAX_BUFFERED_AMOUNT + 1, Ordering::SeqCst);
        let sender = ChunkedSender::new("job-3", channel.clone(), vec![0; 10]);
        let ready = sender.ready_signal();
        let task = tokio::spawn(sender.run(|_| {}, CancellationToken::new()));

        tokio::task::yield_now().await;
        assert!(channel.sent().is_empty());

        channel.buffered.store(0, Ordering::SeqCst);
        ready.notify_one();
        assert_eq!(task.await.unwrap().unwrap(), 10);
    }

    #[tokio::test]
    async fn channel_closing_mid_transfer_fails() {
        let channel = MockChannel::with(ReadyState::Open, Some(2));
        let err = ChunkedSender::new("job-4", channel.clone(), vec![0; 100])
            .with_chunk_size(10)
            .run(|_| {}, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::ChannelClosed));
        assert!(!channel.sent().iter().any(|m| m.is_sentinel()));
    }

    #[tokio::test]
    async fn cancellation_stops_waiting() {
        let channel = MockChannel::with(ReadyState::Connecting, None);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            ChunkedSender::new("job-5", channel, vec![1]).run(|_| {}, cancel.clone()),
        );
        cancel.cancel();
        assert!(matches!(task.await.unwrap(), Err(TransferError::Cancelled)));
    }
}
