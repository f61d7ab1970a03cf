//! Cooperative cancellation with an introspectable cause.
//!
//! A [`CancelHandle`] is the only thing stored per running task. It wraps a
//! [`CancellationToken`] and records *why* it fired, so callers can tell an
//! explicit cancel from a timeout without matching on error strings.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Why a cancellation token fired. A handle that never fired has no cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelCause {
    /// Explicit request (user, queue cancel, queue delete).
    Cancelled,
    /// The run exceeded its configured time budget.
    Timeout,
}

impl std::fmt::Display for CancelCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelCause::Cancelled => write!(f, "cancelled"),
            CancelCause::Timeout => write!(f, "timeout"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
    cause: Arc<OnceLock<CancelCause>>,
    /// Fired when the owning run is over; stops armed timers.
    released: CancellationToken,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. The first cause wins; returns whether this call
    /// was the one that recorded it.
    pub fn cancel(&self, cause: CancelCause) -> bool {
        let recorded = self.cause.set(cause).is_ok();
        self.token.cancel();
        recorded
    }

    pub fn cause(&self) -> Option<CancelCause> {
        self.cause.get().copied()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once cancellation has been requested.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel with [`CancelCause::Timeout`] once `after` elapses, unless the
    /// handle is cancelled or released first.
    pub fn arm_timeout(&self, after: Duration) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(after) => {
                    if handle.cancel(CancelCause::Timeout) {
                        tracing::info!(timeout_secs = after.as_secs(), "Run exceeded its time budget");
                    }
                }
                _ = handle.token.cancelled() => {}
                _ = handle.released.cancelled() => {}
            }
        })
    }

    /// Mark the owning run as finished. Does not set a cause.
    pub fn release(&self) {
        self.released.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_handle_has_no_cause() {
        let handle = CancelHandle::new();
        assert!(!handle.is_cancelled());
        assert_eq!(handle.cause(), None);
    }

    #[test]
    fn first_cause_wins() {
        let handle = CancelHandle::new();
        assert!(handle.cancel(CancelCause::Cancelled));
        assert!(!handle.cancel(CancelCause::Timeout));
        assert!(handle.is_cancelled());
        assert_eq!(handle.cause(), Some(CancelCause::Cancelled));
    }

    #[test]
    fn clones_share_state() {
        let handle = CancelHandle::new();
        let other = handle.clone();
        other.cancel(CancelCause::Timeout);
        assert_eq!(handle.cause(), Some(CancelCause::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn armed_timeout_fires_with_timeout_cause() {
        let handle = CancelHandle::new();
        let timer = handle.arm_timeout(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(6)).await;
        timer.await.unwrap();
        assert_eq!(handle.cause(), Some(CancelCause::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn released_handle_never_times_out() {
        let handle = CancelHandle::new();
        let timer = handle.arm_timeout(Duration::from_secs(5));
        handle.release();
        timer.await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!handle.is_cancelled());
        assert_eq!(handle.cause(), None);
    }
}
