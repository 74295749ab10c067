use crate::error::Result;
use crate::proxy::StatementContext;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// How long and how often to wait for rows locked by another branch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub times: usize,
}

impl RetryPolicy {
    pub fn new(interval: Duration, times: usize) -> Self {
        Self { interval, times }
    }

    /// Number of attempts made. At least one, even if `times` is 0.
    pub fn attempts(&self) -> usize {
        self.times.max(1)
    }
}

/// Source of the waits between attempts
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }
}

/// Runs `attempt` until it succeeds, fails with anything but a lock conflict,
/// or the policy's attempts are used up; in the last case the final conflict
/// is returned. Both the attempts and the waits between them honor the
/// statement's cancellation and deadline.
pub async fn retry_on_lock_conflict<T, F, Fut>(
    ctx: &StatementContext,
    policy: &RetryPolicy,
    clock: &dyn Clock,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T>> + Send,
    T: Send,
{
    let attempts = policy.attempts();
    let mut n = 0;
    loop {
        n += 1;
        match ctx.guard(attempt()).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_lock_conflict() && n < attempts => {
                log::debug!(
                    "lock conflict on attempt {}/{}, retry after {:?}: {}",
                    n,
                    attempts,
                    policy.interval,
                    err
                );
                ctx.guard(async {
                    clock.sleep(policy.interval).await;
                    Ok(())
                })
                .await?;
            }
            Err(err) => return Err(err),
        }
    }
}

/// A clock that records requested sleeps and returns immediately.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingClock {
    sleeps: std::sync::Mutex<Vec<Duration>>,
}

#[cfg(test)]
impl RecordingClock {
    pub(crate) fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Clock for RecordingClock {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::proxy::CommandType;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    fn ctx() -> StatementContext {
        StatementContext::new(CommandType::StmtExecute)
    }

    /// Fails with the given errors in order, then succeeds with the attempt number.
    async fn run(policy: RetryPolicy, errors: Vec<Error>) -> (Result<usize>, usize, Vec<Duration>) {
        let clock = RecordingClock::default();
        let calls = AtomicUsize::new(0);
        let result = retry_on_lock_conflict(&ctx(), &policy, &clock, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            let outcome = match errors.get(n) {
                Some(err) => Err(err.clone()),
                None => Ok(n + 1),
            };
            async move { outcome }
        })
        .await;
        (result, calls.load(Ordering::SeqCst), clock.sleeps())
    }

    #[tokio::test]
    async fn exhausts_attempts() {
        let policy = RetryPolicy::new(Duration::from_millis(50), 4);
        let (result, calls, sleeps) =
            run(policy, vec![Error::LockConflict("held".into()); 10]).await;
        assert_eq!(result, Err(Error::LockConflict("held".into())));
        assert_eq!(calls, 4);
        assert_eq!(sleeps, vec![Duration::from_millis(50); 3]);
    }

    #[tokio::test]
    async fn succeeds_on_later_attempt() {
        let policy = RetryPolicy::new(Duration::from_millis(10), 5);
        let (result, calls, sleeps) =
            run(policy, vec![Error::LockConflict("held".into()); 2]).await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls, 3);
        assert_eq!(sleeps.len(), 2);
    }

    #[tokio::test]
    async fn other_errors_short_circuit() {
        let policy = RetryPolicy::new(Duration::from_millis(10), 5);
        let (result, calls, sleeps) = run(policy, vec![Error::Registration("down".into())]).await;
        assert_eq!(result, Err(Error::Registration("down".into())));
        assert_eq!(calls, 1);
        assert!(sleeps.is_empty());
    }

    #[tokio::test]
    async fn zero_times_still_attempts_once() {
        let (result, calls, _) = run(RetryPolicy::new(Duration::ZERO, 0), vec![]).await;
        assert_eq!(result, Ok(1));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn cancelled_between_attempts() {
        let cancel = CancellationToken::new();
        let ctx = ctx().with_cancel(cancel.clone());
        let policy = RetryPolicy::new(Duration::from_millis(10), 100);
        let calls = AtomicUsize::new(0);
        let result: Result<()> = retry_on_lock_conflict(&ctx, &policy, &TokioClock, || {
            if calls.fetch_add(1, Ordering::SeqCst) == 1 {
                cancel.cancel();
            }
            async { Err(Error::LockConflict("held".into())) }
        })
        .await;
        assert_eq!(result, Err(Error::Cancelled));
        assert!(calls.load(Ordering::SeqCst) < 100);
    }
}
