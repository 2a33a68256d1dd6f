//! Peer connection manager.
//!
//! Owns at most one transport session per process. A session negotiates
//! through the [`SignalingExchange`](printlink_signaling::SignalingExchange),
//! then either receives a blob (offerer, the print agent) or sends one
//! (answerer, the file sender). Everything that happens to a session is
//! funnelled into one event queue and applied by a single driver task, so
//! each event maps to one state transition.

mod error;
mod manager;
mod session;
mod state;

pub use error::PeerError;
pub use manager::{FileReceived, PeerConnectionManager, ProgressFn};
pub use state::{PeerState, StateInput, next_state};
