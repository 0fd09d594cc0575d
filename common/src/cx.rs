//! Call context carrying cancellation and an optional deadline.
//!
//! Every operation that can block (chunk access, cache admission, log leases)
//! takes a [`Cx`] and gives up as soon as the context is done, returning the
//! context's own error so callers can tell their timeout apart from a
//! server-side failure.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Reason a [`Cx`] finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CxError {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation context. Cloning shares the same token and deadline.
#[derive(Debug, Clone)]
pub struct Cx {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for Cx {
    fn default() -> Self {
        Self::background()
    }
}

impl Cx {
    /// A context that is never done unless explicitly canceled.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Derives a child context. Canceling the parent cancels the child, not
    /// the other way around.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derives a child context that expires after `timeout`, or earlier if
    /// the parent's deadline comes first.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns the reason the context is done, or `None` while it is live.
    pub fn err(&self) -> Option<CxError> {
        if self.token.is_cancelled() {
            return Some(CxError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CxError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is canceled or its deadline passes.
    pub async fn done(&self) -> CxError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => CxError::Canceled,
                    _ = tokio::time::sleep_until(deadline) => CxError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                CxError::Canceled
            }
        }
    }
}
