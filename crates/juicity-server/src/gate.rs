//! Authentication gate for one connection
//!
//! Two cancellation scopes: `root` spans the whole connection and is
//! cancelled when authentication fails (or the connection ends); `resolved`
//! is a child of `root` and is cancelled once authentication has an outcome.
//! A child is cancelled together with its parent, so a failure resolves the
//! gate as well. Streams wait on `resolved`, then look at `root` to learn
//! which way it went.

use std::sync::{Arc, OnceLock};

use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use crate::error::StreamError;

#[derive(Clone)]
pub struct AuthGate {
    root: CancellationToken,
    resolved: CancellationToken,
    identity: Arc<OnceLock<Uuid>>,
}

impl AuthGate {
    pub fn new() -> Self {
        let root = CancellationToken::new();
        let resolved = root.child_token();
        Self {
            root,
            resolved,
            identity: Arc::new(OnceLock::new()),
        }
    }

    /// Open the gate for `id`. Only the first outcome counts.
    pub fn accept(&self, id: Uuid) {
        if self.is_resolved() {
            return;
        }
        let _ = self.identity.set(id);
        self.resolved.cancel();
    }

    /// Reject the connection: every stream waiting on the gate, and every
    /// stream that reaches it later, is turned away.
    pub fn reject(&self) {
        self.root.cancel();
    }

    /// Wait for the authentication outcome.
    pub async fn wait(&self) -> Result<Uuid, StreamError> {
        self.resolved.cancelled().await;
        if self.root.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        self.identity.get().copied().ok_or(StreamError::Cancelled)
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.is_cancelled()
    }

    pub fn is_rejected(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Resolves when the connection scope is cancelled.
    pub async fn closed(&self) {
        self.root.cancelled().await
    }

    /// Cancels the connection scope when dropped.
    pub fn drop_guard(&self) -> DropGuard {
        self.root.clone().drop_guard()
    }
}

impl Default for AuthGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_accept_releases_waiters() {
        let gate = AuthGate::new();
        let waiter = tokio::spawn({
            let gate = gate.clone();
            async move { gate.wait().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gate.accept(Uuid::from_u128(9));
        assert_eq!(waiter.await.unwrap().unwrap(), Uuid::from_u128(9));
        // Late arrivals see the same outcome.
        assert_eq!(gate.wait().await.unwrap(), Uuid::from_u128(9));
    }

    #[tokio::test]
    async fn test_reject_releases_waiters_with_cancel() {
        let gate = AuthGate::new();
        let waiter = tokio::spawn({
            let gate = gate.clone();
            async move { gate.wait().await }
        });
        gate.reject();
        assert!(matches!(waiter.await.unwrap(), Err(StreamError::Cancelled)));
        assert!(gate.is_resolved());
        assert!(matches!(gate.wait().await, Err(StreamError::Cancelled)));
    }

    #[tokio::test]
    async fn test_outcome_resolves_once() {
        let gate = AuthGate::new();
        gate.accept(Uuid::from_u128(1));
        gate.accept(Uuid::from_u128(2));
        assert_eq!(gate.wait().await.unwrap(), Uuid::from_u128(1));
    }

    #[tokio::test]
    async fn test_drop_guard_cancels_pending() {
        let gate = AuthGate::new();
        drop(gate.drop_guard());
        assert!(gate.is_rejected());
        assert!(matches!(gate.wait().await, Err(StreamError::Cancelled)));
    }
}
