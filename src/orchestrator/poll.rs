use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{OrchestratorError, Result};
use crate::scheduler::{JobHandle, JobState, Scheduler};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Fixed wait between successive status checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PollPolicy {
    pub interval: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

/// Time limit on one phase of a run.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    phase: &'static str,
    limit: Duration,
    at: Instant,
}

impl Deadline {
    pub(crate) fn start(phase: &'static str, limit: Option<Duration>) -> Option<Self> {
        limit.map(|limit| Self {
            phase,
            limit,
            at: Instant::now() + limit,
        })
    }

    fn timeout(&self) -> OrchestratorError {
        OrchestratorError::Timeout {
            phase: self.phase,
            after: self.limit,
        }
    }
}

/// Resolve with the timeout error once `deadline` passes; never without one.
async fn expired(deadline: Option<&Deadline>) -> OrchestratorError {
    match deadline {
        Some(deadline) => {
            tokio::time::sleep_until(deadline.at).await;
            deadline.timeout()
        }
        None => std::future::pending().await,
    }
}

/// Query `handles` every `policy.interval` until `check` yields a value.
///
/// `check` sees the states in handle order and may abort the wait with an
/// error. The query itself and every sleep race against `interrupt` and the
/// deadline, so a hung status command still times out on schedule.
pub(crate) async fn poll_until<S, T, F>(
    scheduler: &S,
    handles: &[JobHandle],
    policy: &PollPolicy,
    deadline: Option<Deadline>,
    interrupt: &CancellationToken,
    mut check: F,
) -> Result<T>
where
    S: Scheduler + ?Sized,
    F: FnMut(&[JobState]) -> Result<Option<T>>,
{
    loop {
        let states = tokio::select! {
            _ = interrupt.cancelled() => return Err(OrchestratorError::Interrupted),
            err = expired(deadline.as_ref()) => return Err(err),
            states = scheduler.job_states(handles) => states?,
        };
        if let Some(done) = check(&states)? {
            return Ok(done);
        }

        tokio::select! {
            _ = interrupt.cancelled() => return Err(OrchestratorError::Interrupted),
            err = expired(deadline.as_ref()) => return Err(err),
            _ = tokio::time::sleep(policy.interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::scheduler::JobSpec;

    /// Reports every job as pending.
    #[derive(Default)]
    struct Stuck {
        polls: AtomicUsize,
    }

    #[async_trait]
    impl Scheduler for Stuck {
        fn name(&self) -> &'static str {
            "stuck"
        }

        async fn submit(&self, _spec: &JobSpec) -> Result<JobHandle> {
            Ok(JobHandle::new("1"))
        }

        async fn job_states(&self, handles: &[JobHandle]) -> Result<Vec<JobState>> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![JobState::Pending; handles.len()])
        }

        async fn cancel(&self, _handle: &JobHandle) -> Result<()> {
            Ok(())
        }
    }

    /// Status queries never return.
    struct Hung;

    #[async_trait]
    impl Scheduler for Hung {
        fn name(&self) -> &'static str {
            "hung"
        }

        async fn submit(&self, _spec: &JobSpec) -> Result<JobHandle> {
            Ok(JobHandle::new("1"))
        }

        async fn job_states(&self, _handles: &[JobHandle]) -> Result<Vec<JobState>> {
            std::future::pending().await
        }

        async fn cancel(&self, _handle: &JobHandle) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn default_interval_is_five_seconds() {
        assert_eq!(PollPolicy::default().interval, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn returns_on_first_satisfied_check() {
        let scheduler = Stuck::default();
        let handles = [JobHandle::new("1")];
        let value = poll_until(
            &scheduler,
            &handles,
            &PollPolicy::new(Duration::from_millis(1)),
            None,
            &CancellationToken::new(),
            |states| Ok(Some(states.len())),
        )
        .await
        .unwrap();

        assert_eq!(value, 1);
        assert_eq!(scheduler.polls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn times_out() {
        let scheduler = Stuck::default();
        let handles = [JobHandle::new("1")];
        let result: Result<()> = poll_until(
            &scheduler,
            &handles,
            &PollPolicy::new(Duration::from_millis(5)),
            Deadline::start("starting workers", Some(Duration::from_millis(30))),
            &CancellationToken::new(),
            |_| Ok(None),
        )
        .await;

        match result {
            Err(OrchestratorError::Timeout { phase, after }) => {
                assert_eq!(phase, "starting workers");
                assert_eq!(after, Duration::from_millis(30));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(scheduler.polls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn hung_status_query_times_out() {
        let handles = [JobHandle::new("1")];
        let result: Result<()> = tokio::time::timeout(
            Duration::from_secs(5),
            poll_until(
                &Hung,
                &handles,
                &PollPolicy::new(Duration::from_millis(1)),
                Deadline::start("starting workers", Some(Duration::from_millis(50))),
                &CancellationToken::new(),
                |_| Ok(None),
            ),
        )
        .await
        .expect("deadline should cut the hung query short");

        assert!(matches!(
            result,
            Err(OrchestratorError::Timeout {
                phase: "starting workers",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn deadline_shorter_than_interval_fires_on_time() {
        let scheduler = Stuck::default();
        let handles = [JobHandle::new("1")];
        let started = Instant::now();

        let result: Result<()> = poll_until(
            &scheduler,
            &handles,
            &PollPolicy::new(Duration::from_secs(60)),
            Deadline::start("running the driver job", Some(Duration::from_millis(50))),
            &CancellationToken::new(),
            |_| Ok(None),
        )
        .await;

        assert!(matches!(result, Err(OrchestratorError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(scheduler.polls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn interrupt_stops_waiting() {
        let scheduler = Stuck::default();
        let handles = [JobHandle::new("1")];
        let interrupt = CancellationToken::new();

        let trigger = interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result: Result<()> = poll_until(
            &scheduler,
            &handles,
            &PollPolicy::new(Duration::from_secs(60)),
            None,
            &interrupt,
            |_| Ok(None),
        )
        .await;

        assert!(matches!(result, Err(OrchestratorError::Interrupted)));
    }

    #[tokio::test]
    async fn check_error_aborts() {
        let scheduler = Stuck::default();
        let handles = [JobHandle::new("1")];
        let result: Result<()> = poll_until(
            &scheduler,
            &handles,
            &PollPolicy::new(Duration::from_millis(1)),
            None,
            &CancellationToken::new(),
            |_| Err(OrchestratorError::Poll("bad state".into())),
        )
        .await;
        assert!(matches!(result, Err(OrchestratorError::Poll(_))));
    }
}
