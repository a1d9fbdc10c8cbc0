//! Per-call cancellation and deadline.

use std::time::Instant;

use tokio_util::sync::CancellationToken;

/// Cancellation token and deadline attached to a single send.
///
/// A context without a token never cancels; a context without a deadline
/// falls back to the connection's write timeout.
#[derive(Clone, Debug, Default)]
pub struct SendContext {
    token: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl SendContext {
    /// A context that is never canceled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Same as [`background`](Self::background).
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Attach a deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the token has been canceled.
    pub fn is_cancelled(&self) -> bool {
        self.token.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    /// Wait until the token is canceled. Pends forever without a token.
    pub async fn cancelled(&self) {
        match &self.token {
            Some(token) => token.cancelled().await,
            None => std::future::pending().await,
        }
    }
}
