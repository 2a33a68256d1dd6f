//! ICE server configuration.

use serde::{Deserialize, Serialize};

use printlink_protocol::DEFAULT_ICE_CANDIDATE_POOL_SIZE;

/// One STUN or TURN server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(urls: &[&str]) -> Self {
        Self {
            urls: urls.iter().map(|u| u.to_string()).collect(),
            username: None,
            credential: None,
        }
    }

    pub fn turn(url: &str, username: &str, credential: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: Some(username.to_string()),
            credential: Some(credential.to_string()),
        }
    }

    /// Returns `true` if any URL uses the `turn:` or `turns:` scheme.
    pub fn is_relay(&self) -> bool {
        self.urls
            .iter()
            .any(|u| u.starts_with("turn:") || u.starts_with("turns:"))
    }
}

/// Configuration applied to every new peer connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcConfig {
    #[serde(default = "default_pool_size")]
    pub ice_candidate_pool_size: u8,
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<IceServer>,
}

fn default_ice_servers() -> Vec<IceServer> {
    vec![
        IceServer::stun(&[
            "stun:stun1.l.google.com:19302",
            "stun:stun2.l.google.com:19302",
        ]),
        IceServer::turn(
            "turn:openrelay.metered.ca:80",
            "openrelayproject",
            "openrelayproject",
        ),
        IceServer::turn(
            "turn:openrelay.metered.ca:443",
            "openrelayproject",
            "openrelayproject",
        ),
    ]
}

fn default_pool_size() -> u8 {
    DEFAULT_ICE_CANDIDATE_POOL_SIZE
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            ice_candidate_pool_size: default_pool_size(),
        }
    }
}
