use crate::error::DeferredError;
use crate::work::{Work, WorkHandler, WorkState};
use alloc::sync::Arc;
use core::fmt;
use core::time::Duration;
use libos_sync::{Sleeper, SpinLock};

/// The scheduler's handle on one work item.
///
/// Dropping the job detaches the work: it still runs if it already reached
/// the thread's registers, but nobody is told about the result.
pub struct Job {
    handler: Arc<WorkHandler>,
    detach: Arc<SpinLock<()>>,
    sleeper: Arc<dyn Sleeper + Send>,
}

impl Job {
    pub(crate) const fn new(
        handler: Arc<WorkHandler>,
        detach: Arc<SpinLock<()>>,
        sleeper: Arc<dyn Sleeper + Send>,
    ) -> Self {
        Self {
            handler,
            detach,
            sleeper,
        }
    }

    #[must_use]
    pub fn work(&self) -> &Work {
        self.handler.work()
    }

    #[must_use]
    pub fn state(&self) -> WorkState {
        self.handler.state()
    }

    /// The result, if the work is done.
    #[must_use]
    pub fn try_response(&self) -> Option<Result<u64, DeferredError>> {
        if !self.handler.completion().is_complete() {
            return None;
        }
        self.handler.outcome().result()
    }

    /// Block until the work returned. `None` waits forever.
    ///
    /// # Errors
    /// * [`DeferredError::Timeout`] if `timeout` elapsed first.
    /// * [`DeferredError::Discarded`] if the work will never run.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<u64, DeferredError> {
        self.handler
            .completion()
            .wait(self.sleeper.as_ref(), timeout)
            .map_err(|_| DeferredError::Timeout)?;
        self.handler
            .outcome()
            .result()
            .unwrap_or(Err(DeferredError::Discarded))
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("handler", &self.handler)
            .finish_non_exhaustive()
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        let _guard = self.detach.lock();
        self.handler.detach();
    }
}
