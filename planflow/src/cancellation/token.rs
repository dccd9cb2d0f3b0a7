//! Cancellation token shared by the inline work of one plan execution.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use uuid::Uuid;

/// Why a token was cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelCause {
    /// The interrupt that requested cancellation, if one did.
    pub interrupt_id: Option<Uuid>,
    /// Human-readable reason.
    pub reason: String,
}

/// A token for cooperative cancellation.
///
/// The first cancellation wins; later calls leave the recorded cause alone.
#[derive(Default)]
pub struct CancellationToken {
    cancelled: AtomicBool,
    cause: RwLock<Option<CancelCause>>,
    notify: Notify,
}

impl CancellationToken {
    /// Creates a live token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels without an interrupt behind it, e.g. on shutdown.
    pub fn cancel(&self, reason: impl Into<String>) {
        self.cancel_with(CancelCause {
            interrupt_id: None,
            reason: reason.into(),
        });
    }

    /// Cancels on behalf of an interrupt.
    pub fn cancel_for_interrupt(&self, interrupt_id: Uuid, reason: impl Into<String>) {
        self.cancel_with(CancelCause {
            interrupt_id: Some(interrupt_id),
            reason: reason.into(),
        });
    }

    fn cancel_with(&self, cause: CancelCause) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        *self.cause.write() = Some(cause);
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// The recorded cause, once cancelled.
    #[must_use]
    pub fn cause(&self) -> Option<CancelCause> {
        self.cause.read().clone()
    }

    /// Waits until the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("cause", &self.cause())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_first_cause_wins() {
        let token = CancellationToken::new();
        let interrupt_id = Uuid::new_v4();
        token.cancel_for_interrupt(interrupt_id, "abort all");
        token.cancel("shutdown");

        assert!(token.is_cancelled());
        assert_eq!(
            token.cause(),
            Some(CancelCause {
                interrupt_id: Some(interrupt_id),
                reason: "abort all".to_string(),
            })
        );
    }

    #[test]
    fn test_live_token_has_no_cause() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert_eq!(token.cause(), None);
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let token = Arc::new(CancellationToken::new());
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        tokio::task::yield_now().await;
        token.cancel("stop");
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_returns_at_once_when_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel("early");
        tokio::time::timeout(std::time::Duration::from_millis(100), token.cancelled())
            .await
            .unwrap();
    }
}
