pub mod capture_worker;
pub mod clip_worker;
pub mod reconciliation;
pub mod retention;
pub mod scheduler;

pub use capture_worker::CaptureWorker;
pub use clip_worker::ClipWorker;
pub use reconciliation::{OrphanCleanupSummary, ReconciliationReport, StorageReconciler};
pub use retention::{RetentionEnforcer, RetentionSummary};
pub use scheduler::{PeriodicJob, Scheduler};

use crate::error::Result;
use log::error;
use std::fmt::Display;

/// Map a handler outcome onto the broker contract: only retryable errors are
/// handed back for redelivery, everything else is logged and acknowledged.
pub(crate) fn settle(result: Result<()>, what: &str, id: impl Display) -> Result<()> {
    match result {
        Err(e) if e.is_retryable() => Err(e),
        Err(e) => {
            error!("Giving up on {} {}: {}", what, id, e);
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn only_retryable_errors_reach_the_broker() {
        assert!(settle(Err(Error::Database("down".into())), "clip", 1).is_err());
        assert!(settle(Err(Error::NotFound("gone".into())), "clip", 1).is_ok());
        assert!(settle(Ok(()), "clip", 1).is_ok());
    }
}
