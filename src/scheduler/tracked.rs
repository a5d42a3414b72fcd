use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{JobHandle, JobSpec, JobState, Scheduler};
use crate::error::Result;

/// Jobs submitted through a [`TrackingScheduler`] that may still be alive.
#[derive(Debug, Clone, Default)]
pub struct JobLedger(Arc<Mutex<Vec<JobHandle>>>);

impl JobLedger {
    /// Submitted jobs not yet seen finished or cancelled, in submission order.
    pub fn outstanding(&self) -> Vec<JobHandle> {
        self.lock().clone()
    }

    fn record(&self, handle: &JobHandle) {
        self.lock().push(handle.clone());
    }

    fn forget(&self, handle: &JobHandle) {
        self.lock().retain(|h| h != handle);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<JobHandle>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Wraps a scheduler and keeps a [`JobLedger`] of its live jobs, so a forced
/// exit can still name what it leaves behind.
pub struct TrackingScheduler<S> {
    inner: S,
    ledger: JobLedger,
}

impl<S> TrackingScheduler<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            ledger: JobLedger::default(),
        }
    }

    pub fn ledger(&self) -> JobLedger {
        self.ledger.clone()
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: Scheduler> Scheduler for TrackingScheduler<S> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn submit(&self, spec: &JobSpec) -> Result<JobHandle> {
        let handle = self.inner.submit(spec).await?;
        self.ledger.record(&handle);
        Ok(handle)
    }

    async fn job_states(&self, handles: &[JobHandle]) -> Result<Vec<JobState>> {
        let states = self.inner.job_states(handles).await?;
        for (handle, state) in handles.iter().zip(&states) {
            if state.is_terminal() {
                self.ledger.forget(handle);
            }
        }
        Ok(states)
    }

    async fn cancel(&self, handle: &JobHandle) -> Result<()> {
        self.inner.cancel(handle).await?;
        self.ledger.forget(handle);
        Ok(())
    }
}
