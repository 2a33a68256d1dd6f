//! Unsubscribe handles.

use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Handle for a live change subscription.
///
/// [`unsubscribe`](Self::unsubscribe) releases the subscription; calling it
/// again is a no-op. Dropping the handle unsubscribes as well.
#[derive(Debug)]
pub struct Subscription {
    label: String,
    token: Option<CancellationToken>,
}

impl Subscription {
    /// Wraps a cancellation token. Cancelling it ends the subscription.
    pub fn new(label: impl Into<String>, token: CancellationToken) -> Self {
        Self {
            label: label.into(),
            token: Some(token),
        }
    }

    /// Releases the subscription.
    ///
    /// Returns `true` if this call released it, `false` if it was already
    /// released.
    pub fn unsubscribe(&mut self) -> bool {
        match self.token.take() {
            Some(token) => {
                token.cancel();
                trace!(subscription = %self.label, "unsubscribed");
                true
            }
            None => false,
        }
    }

    /// Returns `true` until the subscription is released.
    pub fn is_active(&self) -> bool {
        self.token.as_ref().is_some_and(|t| !t.is_cancelled())
    }

    /// Human-readable description, used in logs.
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
