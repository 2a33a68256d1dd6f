use sha2::{Digest, Sha256};

use printlink_protocol::{ChannelMessage, EOF_SENTINEL};

use crate::TransferError;

/// One unit of the transfer protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A slice of the blob, sent as a binary message.
    Data(Vec<u8>),
    /// The end-of-transfer marker.
    End,
}

impl Frame {
    /// Interprets a channel message.
    ///
    /// Binary messages are data; the only valid text message is the
    /// end-of-transfer marker.
    pub fn from_message(message: ChannelMessage) -> Result<Self, TransferError> {
        match message {
            ChannelMessage::Binary(data) => Ok(Frame::Data(data)),
            ChannelMessage::Text(text) if text == EOF_SENTINEL => Ok(Frame::End),
            ChannelMessage::Text(text) => Err(TransferError::UnexpectedText(text)),
        }
    }

    pub fn into_message(self) -> ChannelMessage {
        match self {
            Frame::Data(data) => ChannelMessage::Binary(data),
            Frame::End => ChannelMessage::sentinel(),
        }
    }

    /// Payload bytes carried by the frame. Zero for the marker.
    pub fn payload_len(&self) -> usize {
        match self {
            Frame::Data(data) => data.len(),
            Frame::End => 0,
        }
    }
}

/// Number of data frames needed for `total` bytes.
pub fn frame_count(total: usize, chunk_size: usize) -> usize {
    total.div_ceil(chunk_size.max(1))
}

/// Yields the data frames of a blob in order, then one [`Frame::End`].
pub struct FrameSplitter<'a> {
    chunks: std::slice::Chunks<'a, u8>,
    finished: bool,
}

impl<'a> FrameSplitter<'a> {
    /// A `chunk_size` of 0 is treated as 1.
    pub fn new(blob: &'a [u8], chunk_size: usize) -> Self {
        Self {
            chunks: blob.chunks(chunk_size.max(1)),
            finished: false,
        }
    }
}

impl Iterator for FrameSplitter<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if let Some(chunk) = self.chunks.next() {
            return Some(Frame::Data(chunk.to_vec()));
        }
        if self.finished {
            return None;
        }
        self.finished = true;
        Some(Frame::End)
    }
}

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
