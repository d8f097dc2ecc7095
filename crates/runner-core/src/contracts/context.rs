use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Threaded explicitly through every port call instead of relying on ambient
/// cancellation state. Cloning a `RunContext` shares the same cancellation token.
#[derive(Debug, Clone)]
pub struct RunContext {
    cancel: CancellationToken,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A context derived from this one; cancelling the parent cancels the child,
    /// cancelling the child does not affect the parent.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
        }
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub async fn wait_with_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.cancelled()).await.is_ok()
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
