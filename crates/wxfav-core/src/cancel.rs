use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{FavError, Result};

/// Cooperative cancellation for a transfer. Clones share the same flag, so a
/// signal handler can hold one while the worker checks another.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Return `Err(FavError::Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(FavError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let token = CancellationToken::new();
        let handler_side = token.clone();
        assert!(token.check().is_ok());
        handler_side.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(FavError::Cancelled)));
    }
}
