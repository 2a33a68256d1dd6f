use serde::{Deserialize, Serialize};

use crate::constants::EOF_SENTINEL;

/// One message on the peer data channel.
///
/// File payload travels as `Binary`; the end-of-transfer marker is the
/// only `Text` message the transfer protocol emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum ChannelMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl ChannelMessage {
    /// Returns the end-of-transfer marker.
    pub fn sentinel() -> Self {
        ChannelMessage::Text(EOF_SENTINEL.to_string())
    }

    /// Returns `true` if this is the end-of-transfer marker.
    pub fn is_sentinel(&self) -> bool {
        matches!(self, ChannelMessage::Text(t) if t == EOF_SENTINEL)
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            ChannelMessage::Text(t) => t.len(),
            ChannelMessage::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_is_text_eof() {
        let s = ChannelMessage::sentinel();
        assert!(s.is_sentinel());
        assert_eq!(s, ChannelMessage::Text("EOF".into()));
    }

    #[test]
    fn binary_eof_bytes_are_not_the_sentinel() {
        let m = ChannelMessage::Binary(b"EOF".to_vec());
        assert!(!m.is_sentinel());
        assert_eq!(m.len(), 3);
    }

    #[test]
    fn other_text_is_not_the_sentinel() {
        assert!(!ChannelMessage::Text("eof".into()).is_sentinel());
        assert!(ChannelMessage::Text(String::new()).is_empty());
    }
}
