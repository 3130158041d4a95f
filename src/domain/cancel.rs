// ============================================================
// Layer 3 — Cooperative Cancellation
// ============================================================
// A shared stop flag. Long-running loops (download, batch
// production, epochs, evaluation) poll it between units of work
// and bail out with PipelineError::Cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::domain::error::{PipelineError, Result, Stage};

/// Cloneable handle; every clone observes the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled(stage))` once the flag is set.
    pub fn check(&self, stage: Stage) -> Result<()> {
        if self.is_cancelled() {
            tracing::warn!("{} cancelled", stage);
            return Err(PipelineError::Cancelled(stage));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(token.check(Stage::Training).is_ok());
        other.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(
            token.check(Stage::Training),
            Err(PipelineError::Cancelled(Stage::Training))
        ));
    }
}
