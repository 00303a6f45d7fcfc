use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use crate::error::{Result, SegmaskError};

/// Best-effort cancellation flag shared between the owner and a running batch.
///
/// Batches poll it between independent units of work and abandon the whole
/// batch once it is set.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Re-arm the token for the next batch
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Relaxed);
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SegmaskError::Cancelled)
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
        let token = CancelToken::new();
        let worker_side = token.clone();
        assert!(worker_side.check().is_ok());

        token.cancel();
        assert!(matches!(worker_side.check(), Err(SegmaskError::Cancelled)));

        token.reset();
        assert!(!worker_side.is_cancelled());
    }
}
