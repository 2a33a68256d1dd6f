//! Throughput of a running transfer.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sliding window over recently sent frames.
#[derive(Debug)]
pub struct TransferRate {
    window: Duration,
    frames: VecDeque<(Instant, u64)>,
}

impl Default for TransferRate {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl TransferRate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            frames: VecDeque::new(),
        }
    }

    pub fn record(&mut self, bytes: u64) {
        self.record_at(Instant::now(), bytes);
    }

    fn record_at(&mut self, now: Instant, bytes: u64) {
        self.frames.push_back((now, bytes));
        while let Some((at, _)) = self.frames.front() {
            if now.duration_since(*at) <= self.window {
                break;
            }
            self.frames.pop_front();
        }
    }

    /// Bytes per second across the window; `None` until two frames span
    /// some time.
    pub fn bytes_per_second(&self) -> Option<f64> {
        let (first, _) = self.frames.front()?;
        let (last, _) = self.frames.back()?;
        let elapsed = last.duration_since(*first).as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }
        // The first frame opens the window; its bytes were sent before it.
        let bytes: u64 = self.frames.iter().skip(1).map(|(_, b)| b).sum();
        Some(bytes as f64 / elapsed)
    }

    /// Time left for `remaining` bytes at the current rate.
    pub fn eta(&self, remaining: u64) -> Option<Duration> {
        let rate = self.bytes_per_second().filter(|r| *r > 0.0)?;
        Some(Duration::from_secs_f64(remaining as f64 / rate))
    }
}
