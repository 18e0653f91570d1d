//! Per-call operation context
//!
//! Cancellation is cooperative: pipeline steps poll the token between stages
//! and bail out with [`Error::Cancelled`]. Nothing is torn down forcibly.

use crate::{Error, Result};
use tokio_util::sync::CancellationToken;

/// Context threaded through `pre_process` and `process`
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    token: CancellationToken,
}

impl OpContext {
    /// Fresh, uncancelled context
    pub fn new() -> Self {
        Self::default()
    }

    /// Context observing an existing token
    pub fn with_token(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Child context, cancelled together with this one
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Underlying token
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel this context and its children
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the context was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fail with [`Error::Cancelled`] once cancelled
    pub fn ensure_active(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}
