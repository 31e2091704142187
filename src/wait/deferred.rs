// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use tokio::sync::{oneshot, Semaphore};
use tokio::time::{sleep, Instant};
use tracing::debug;

use super::engine::Wait;
use super::Probe;
use crate::constants;
use crate::error::{HarnessError, Result};

/// Bounded set of permits shared by deferred waits.
///
/// Evaluations run as tasks on the ambient tokio runtime, so they never keep the
/// process alive; the pool only caps how many ready checks are in flight at once.
#[derive(Clone, Debug)]
pub struct WaitPool {
    permits: Arc<Semaphore>,
}

impl WaitPool {
    pub fn new(workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// The process-wide pool used when a wait does not name one
    pub fn shared() -> Self {
        static SHARED: OnceLock<WaitPool> = OnceLock::new();
        SHARED
            .get_or_init(|| WaitPool::new(constants::wait::ASYNC_WAIT_WORKERS))
            .clone()
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// Completion of a deferred wait.
///
/// Resolves to the wait's outcome. Dropping it, or calling [`WaitHandle::cancel`],
/// stops the scheduled chain before its next evaluation; an evaluation already in
/// flight is allowed to finish.
#[must_use = "dropping a WaitHandle cancels the wait"]
#[derive(Debug)]
pub struct WaitHandle {
    description: String,
    rx: oneshot::Receiver<Result<()>>,
}

impl WaitHandle {
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn cancel(self) {
        debug!(description = %self.description, "Deferred wait cancelled");
    }
}

impl Future for WaitHandle {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(HarnessError::WaitAbandoned(
                self.description.clone(),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

pub(super) fn spawn<F, Fut>(wait: Wait, ready_check: F) -> WaitHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Probe> + Send + 'static,
{
    let (mut tx, rx) = oneshot::channel();
    let description = wait.description.clone();

    tokio::spawn(async move {
        if let Some(outcome) = run(wait, ready_check, &mut tx).await {
            // The handle may have been dropped while the last check was running
            let _ = tx.send(outcome);
        }
    });

    WaitHandle { description, rx }
}

/// Returns `None` when nobody is listening for the outcome any more.
async fn run<F, Fut>(
    mut wait: Wait,
    mut ready_check: F,
    tx: &mut oneshot::Sender<Result<()>>,
) -> Option<Result<()>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Probe>,
{
    let pool = wait.pool.take().unwrap_or_else(WaitPool::shared);
    let cancel = wait.cancel.take();
    let deadline = Instant::now().checked_add(wait.timeout);

    loop {
        let pause = deadline.map_or(wait.poll_interval, |d| {
            wait.poll_interval.min(d.saturating_duration_since(Instant::now()))
        });
        tokio::select! {
            _ = tx.closed() => {
                debug!(description = %wait.description, "Deferred wait dropped, not rescheduling");
                return None;
            }
            _ = async {
                match &cancel {
                    Some(token) => token.cancelled().await,
                    None => std::future::pending::<()>().await,
                }
            } => {
                return Some(Ok(()));
            }
            _ = sleep(pause) => {}
        }

        if tx.is_closed() {
            return None;
        }

        let outcome = {
            let Ok(_permit) = pool.permits.acquire().await else {
                return Some(Err(HarnessError::WaitAbandoned(wait.description)));
            };
            ready_check().await
        };

        match outcome {
            Probe::Ready => return Some(Ok(())),
            Probe::NotReady => {}
            Probe::Transient(err) => {
                return Some(Err(HarnessError::PredicateFailed {
                    description: wait.description,
                    message: format!("{err:#}"),
                }));
            }
        }

        if deadline.is_some_and(|d| Instant::now() >= d) {
            if let Some(hook) = wait.on_timeout.take() {
                hook();
            }
            return Some(Err(HarnessError::ConvergenceTimeout {
                description: wait.description,
                timeout: wait.timeout,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_until_async_ready_after_five_polls() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let handle = Wait::new("five polls")
            .poll_interval(Duration::from_millis(10))
            .timeout(Duration::from_secs(5))
            .until_async(move || {
                let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Probe::from(count == 5) }
            });

        assert!(handle.await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_until_async_always_false_times_out() {
        let handle = Wait::new("never")
            .poll_interval(Duration::from_millis(10))
            .timeout(Duration::from_millis(100))
            .until_async(|| async { Probe::NotReady });

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("deferred wait must not hang");

        match result {
            Err(HarnessError::ConvergenceTimeout { description, .. }) => {
                assert_eq!(description, "never");
            }
            other => panic!("expected ConvergenceTimeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_until_async_does_not_sleep_past_deadline() {
        let start = std::time::Instant::now();

        let result = Wait::new("short budget")
            .poll_interval(Duration::from_millis(400))
            .timeout(Duration::from_millis(50))
            .until_async(|| async { Probe::NotReady })
            .await;

        assert!(matches!(result, Err(HarnessError::ConvergenceTimeout { .. })));
        let elapsed = start.elapsed();
        assert!(elapsed < Duration::from_millis(300), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn test_until_async_accepts_unbounded_timeout() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let handle = Wait::new("forever")
            .poll_interval(Duration::from_millis(5))
            .timeout(Duration::MAX)
            .until_async(move || {
                let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Probe::from(count >= 2) }
            });

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("deferred wait must not hang");
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_until_async_first_error_fails() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let handle = Wait::new("broken check")
            .poll_interval(Duration::from_millis(10))
            .timeout(Duration::from_secs(5))
            .until_async(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Probe::Transient(anyhow::anyhow!("forbidden")) }
            });

        match handle.await {
            Err(HarnessError::PredicateFailed { message, .. }) => assert!(message.contains("forbidden")),
            other => panic!("expected PredicateFailed, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_handle_stops_rescheduling() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let handle = Wait::new("abandoned")
            .poll_interval(Duration::from_millis(10))
            .timeout(Duration::from_secs(5))
            .until_async(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Probe::NotReady }
            });

        sleep(Duration::from_millis(55)).await;
        handle.cancel();
        sleep(Duration::from_millis(30)).await;
        let after_cancel = calls.load(Ordering::SeqCst);
        sleep(Duration::from_millis(100)).await;

        assert_eq!(calls.load(Ordering::SeqCst), after_cancel);
    }

    #[tokio::test]
    async fn test_pool_limits_in_flight_checks() {
        let pool = WaitPool::new(1);
        let in_flight = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let handles: Vec<WaitHandle> = (0..4)
            .map(|i| {
                let in_flight = in_flight.clone();
                let max_seen = max_seen.clone();
                Wait::new(format!("check {i}"))
                    .poll_interval(Duration::from_millis(5))
                    .timeout(Duration::from_secs(5))
                    .pool(pool.clone())
                    .until_async(move || {
                        let in_flight = in_flight.clone();
                        let max_seen = max_seen.clone();
                        async move {
                            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                            max_seen.fetch_max(now, Ordering::SeqCst);
                            sleep(Duration::from_millis(10)).await;
                            in_flight.fetch_sub(1, Ordering::SeqCst);
                            Probe::Ready
                        }
                    })
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            assert!(result.is_ok());
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(pool.available(), 1);
    }
}
